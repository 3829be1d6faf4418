//! Kernel configuration structures.

use crate::args::ArgView;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    F32,
    F16,
    BF16,
}

impl DataType {
    pub fn element_size_bytes(&self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 | DataType::BF16 => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a tunable (meta) parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

/// Named meta-parameters, ordered by name so iteration and hashing are stable.
pub type Params = BTreeMap<String, ParamValue>;

/// Device launch parameters attached to every configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchParams {
    pub num_warps: u32,
    pub num_stages: u32,
    pub num_ctas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxnreg: Option<u32>,
}

impl Default for LaunchParams {
    fn default() -> Self {
        Self {
            num_warps: 4,
            num_stages: 2,
            num_ctas: 1,
            maxnreg: None,
        }
    }
}

impl LaunchParams {
    pub const NAMES: [&'static str; 4] = ["num_warps", "num_ctas", "num_stages", "maxnreg"];

    pub fn new(num_warps: u32, num_stages: u32, num_ctas: u32) -> Self {
        Self {
            num_warps,
            num_stages,
            num_ctas,
            maxnreg: None,
        }
    }

    pub fn with_maxnreg(mut self, maxnreg: Option<u32>) -> Self {
        self.maxnreg = maxnreg;
        self
    }

    /// Launch parameters as named values; an unset `maxnreg` is omitted.
    pub fn entries(&self) -> Vec<(&'static str, ParamValue)> {
        let mut entries = vec![
            ("num_warps", ParamValue::from(self.num_warps)),
            ("num_ctas", ParamValue::from(self.num_ctas)),
            ("num_stages", ParamValue::from(self.num_stages)),
        ];
        if let Some(maxnreg) = self.maxnreg {
            entries.push(("maxnreg", ParamValue::from(maxnreg)));
        }
        entries
    }
}

/// Hook attached to a configuration and invoked with the full argument view
/// right before the kernel runs with that configuration.
pub trait ConfigHook: Send + Sync {
    fn call(&self, view: &ArgView<'_>) -> Result<()>;
}

impl<F> ConfigHook for F
where
    F: Fn(&ArgView<'_>) -> Result<()> + Send + Sync,
{
    fn call(&self, view: &ArgView<'_>) -> Result<()> {
        self(view)
    }
}

/// One concrete assignment of tunable parameters plus launch parameters.
///
/// Equality and hashing cover `params` and `launch` only; the pre-hook is
/// carried along but is not part of a configuration's identity.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    params: Params,
    launch: LaunchParams,
    #[serde(skip)]
    pre_hook: Option<Arc<dyn ConfigHook>>,
}

impl Configuration {
    pub fn new(params: Params, launch: LaunchParams) -> Self {
        Self {
            params,
            launch,
            pre_hook: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_launch(mut self, launch: LaunchParams) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_pre_hook(mut self, hook: Option<Arc<dyn ConfigHook>>) -> Self {
        self.pre_hook = hook;
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn launch(&self) -> LaunchParams {
        self.launch
    }

    pub fn pre_hook(&self) -> Option<&Arc<dyn ConfigHook>> {
        self.pre_hook.as_ref()
    }

    /// Tunable parameters merged with the launch parameters.
    pub fn all_params(&self) -> Params {
        let mut all = self.params.clone();
        for (name, value) in self.launch.entries() {
            all.insert(name.to_string(), value);
        }
        all
    }
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.launch == other.launch
    }
}

impl Eq for Configuration {}

impl Hash for Configuration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.params.hash(state);
        self.launch.hash(state);
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("params", &self.params)
            .field("launch", &self.launch)
            .field("pre_hook", &self.pre_hook.is_some())
            .finish()
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .params
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        parts.push(format!("num_warps: {}", self.launch.num_warps));
        parts.push(format!("num_ctas: {}", self.launch.num_ctas));
        parts.push(format!("num_stages: {}", self.launch.num_stages));
        match self.launch.maxnreg {
            Some(maxnreg) => parts.push(format!("maxnreg: {maxnreg}")),
            None => parts.push("maxnreg: None".to_string()),
        }
        f.write_str(&parts.join(", "))
    }
}
