//! Kernel capability consumed by the autotuner.

use crate::args::KernelArgs;
use crate::config::{Configuration, LaunchParams, ParamValue, Params};
use thiserror::Error;

/// Failure raised while compiling or launching a kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The configuration asks for more device resources than are available.
    #[error("out of resources: {resource} required {required}, hardware limit {limit}")]
    OutOfResources {
        resource: String,
        required: usize,
        limit: usize,
    },
    /// A static assertion in the kernel body rejected this configuration.
    #[error("compile-time assertion failed: {0}")]
    CompileTimeAssertion(String),
    /// A runtime assertion raised by the kernel or its benchmarking harness.
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KernelError {
    /// Whether this failure only disqualifies the configuration that produced it.
    pub fn is_configuration_failure(&self) -> bool {
        matches!(
            self,
            KernelError::OutOfResources { .. }
                | KernelError::CompileTimeAssertion(_)
                | KernelError::Assertion(_)
        )
    }
}

/// Call-time meta-parameters merged with one configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub params: Params,
    pub launch: LaunchParams,
}

impl LaunchRequest {
    /// Merges call kwargs with the configuration's tunables; the configuration
    /// wins on overlap, callers reject collisions beforehand.
    pub fn merged(kwargs: &Params, config: &Configuration) -> Self {
        let mut params = kwargs.clone();
        for (name, value) in config.params() {
            params.insert(name.clone(), value.clone());
        }
        Self {
            params,
            launch: config.launch(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn int_param(&self, name: &str) -> Result<i64, KernelError> {
        self.param(name).and_then(ParamValue::as_int).ok_or_else(|| {
            KernelError::Other(anyhow::anyhow!("missing integer meta-parameter `{name}`"))
        })
    }

    /// Meta-parameters plus launch parameters, the view hooks and cost models see.
    pub fn flattened(&self) -> Params {
        let mut all = self.params.clone();
        for (name, value) in self.launch.entries() {
            all.insert(name.to_string(), value);
        }
        all
    }
}

/// A compiled, launchable kernel whose output does not depend on the chosen
/// configuration, only its latency does.
pub trait Kernel: Send + Sync {
    type Output;

    fn name(&self) -> &str;

    /// Declared argument names, in positional order.
    fn arg_names(&self) -> &[&'static str];

    fn run(
        &self,
        args: &KernelArgs,
        request: &LaunchRequest,
    ) -> Result<Self::Output, KernelError>;

    /// Compiles/prepares the kernel for `request` without executing it.
    fn warmup(
        &self,
        args: &KernelArgs,
        request: &LaunchRequest,
    ) -> Result<(), KernelError>;
}
