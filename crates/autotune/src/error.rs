//! Error taxonomy of the decision engine.

use crate::bench::Timing;
use crate::key::CacheKey;
use thiserror::Error;
use tunecache_kernels::KernelError;

#[derive(Debug, Error)]
pub enum TuneError {
    #[error("can't configure both an explicit configuration list and a configuration space")]
    ConfigsAndSpace,

    #[error("configuration space generation failed: {0}")]
    SpaceGeneration(#[source] anyhow::Error),

    #[error("kernel `{kernel}` has no argument named `{name}`")]
    UnknownArgument { kernel: String, name: String },

    #[error("no value supplied for key argument `{0}`")]
    MissingKeyArgument(String),

    #[error(
        "conflicting meta-parameters: {}. Make sure that you don't re-define auto-tuned symbols",
        .0.join(", ")
    )]
    ConflictingParameters(Vec<String>),

    #[error("all autotune candidates failed for key {key} (timing is {timing})")]
    AllConfigurationsFailed { key: CacheKey, timing: Timing },

    #[error("pruning failed: {0}")]
    Prune(#[source] anyhow::Error),

    #[error("hook failed: {0}")]
    Hook(#[source] anyhow::Error),

    #[error("cache store failed: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub type Result<T, E = TuneError> = std::result::Result<T, E>;
