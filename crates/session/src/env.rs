//! Process environment switches for the autotuner.

use std::env;
use tunecache_autotune::EngineConfig;

pub const DEBUG_VAR: &str = "TUNECACHE_DEBUG";
pub const PRINT_AUTOTUNING_VAR: &str = "TUNECACHE_PRINT_AUTOTUNING";
pub const USE_ONLY_RESTORED_VAR: &str = "TUNECACHE_USE_ONLY_RESTORED";

/// Reads the `TUNECACHE_*` switches from the process environment.
pub fn engine_config_from_env() -> EngineConfig {
    engine_config_from_lookup(|name| env::var(name).ok())
}

/// Builds an [`EngineConfig`] from any variable lookup; unset or unparsable
/// values leave a switch off.
pub fn engine_config_from_lookup<F>(lookup: F) -> EngineConfig
where
    F: Fn(&str) -> Option<String>,
{
    let flag = |name: &str| lookup(name).and_then(|value| parse_bool(&value)).unwrap_or(false);
    EngineConfig {
        debug: flag(DEBUG_VAR),
        print_autotuning: flag(PRINT_AUTOTUNING_VAR),
        use_only_restored: flag(USE_ONLY_RESTORED_VAR),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
