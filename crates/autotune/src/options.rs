//! Engine construction options.

use crate::bench::BenchMode;
use crate::hooks::{PostDispatchHook, PreDispatchHook};
use crate::key::KeySpec;
use crate::prune::PruneSpec;
use crate::space::ConfigurationSpace;
use std::sync::Arc;
use tunecache_kernels::Configuration;

/// Process-wide switches, supplied once at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Log configuration counts at `info` instead of `debug`.
    pub debug: bool,
    /// Log the winner and elapsed time of every resolution.
    pub print_autotuning: bool,
    /// Benchmark only configurations that already won under this identity.
    pub use_only_restored: bool,
}

impl EngineConfig {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_print_autotuning(mut self, print: bool) -> Self {
        self.print_autotuning = print;
        self
    }

    pub fn with_use_only_restored(mut self, restricted: bool) -> Self {
        self.use_only_restored = restricted;
        self
    }
}

#[derive(Clone)]
pub struct TunerOptions {
    pub key: KeySpec,
    pub configs: Option<Vec<Configuration>>,
    pub space: Option<ConfigurationSpace>,
    pub reset_to_zero: Vec<String>,
    pub restore_value: Vec<String>,
    pub pre_hook: Option<Arc<dyn PreDispatchHook>>,
    pub post_hook: Option<Arc<dyn PostDispatchHook>>,
    pub prune: Option<PruneSpec>,
    pub warmup: usize,
    pub rep: usize,
    pub bench_mode: BenchMode,
}

impl Default for TunerOptions {
    fn default() -> Self {
        Self {
            key: KeySpec::default(),
            configs: None,
            space: None,
            reset_to_zero: Vec::new(),
            restore_value: Vec::new(),
            pre_hook: None,
            post_hook: None,
            prune: None,
            warmup: 25,
            rep: 100,
            bench_mode: BenchMode::Direct,
        }
    }
}

impl TunerOptions {
    pub fn new<S: Into<String>>(key: impl IntoIterator<Item = S>) -> Self {
        Self {
            key: KeySpec::new(key),
            ..Self::default()
        }
    }

    pub fn with_configs(mut self, configs: Vec<Configuration>) -> Self {
        self.configs = Some(configs);
        self
    }

    pub fn with_space(mut self, space: ConfigurationSpace) -> Self {
        self.space = Some(space);
        self
    }

    pub fn with_reset_to_zero<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.reset_to_zero = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_restore_value<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.restore_value = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the built-in reset/restore pre-dispatch behavior.
    pub fn with_pre_hook(mut self, hook: Arc<dyn PreDispatchHook>) -> Self {
        self.pre_hook = Some(hook);
        self
    }

    /// Replaces the built-in restore post-dispatch behavior.
    pub fn with_post_hook(mut self, hook: Arc<dyn PostDispatchHook>) -> Self {
        self.post_hook = Some(hook);
        self
    }

    pub fn with_prune(mut self, prune: PruneSpec) -> Self {
        self.prune = Some(prune);
        self
    }

    pub fn with_runs(mut self, warmup: usize, rep: usize) -> Self {
        self.warmup = warmup;
        self.rep = rep.max(1);
        self
    }

    pub fn with_bench_mode(mut self, mode: BenchMode) -> Self {
        self.bench_mode = mode;
        self
    }

    pub fn has_custom_hooks(&self) -> bool {
        self.pre_hook.is_some() || self.post_hook.is_some()
    }

    /// The string whose hash scopes persisted decisions to these tuning
    /// parameters.
    pub fn params_descriptor(&self) -> String {
        let mode = match self.bench_mode {
            BenchMode::Direct => "direct",
            BenchMode::GraphReplay => "graph",
        };
        format!(
            "autotuner params: warmup {} rep {} mode {} custom_hooks {}",
            self.warmup,
            self.rep,
            mode,
            self.has_custom_hooks()
        )
    }
}
