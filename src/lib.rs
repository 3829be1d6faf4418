//! tunecache: benchmark candidate kernel configurations once per cache key
//! and dispatch every later call straight to the remembered winner.

pub use tunecache_autotune as autotune;
pub use tunecache_kernels as kernels;
pub use tunecache_session as session;

pub use tunecache_autotune::{
    Autotuner, BenchMode, CacheKey, ConfigurationSpace, EngineConfig, JsonFileStore, MemoryStore,
    PruneSpec, Store, TopK, TuneError, TunerOptions,
};
pub use tunecache_kernels::{Configuration, Kernel, KernelArgs, KernelError, LaunchParams, Params};
pub use tunecache_session::{SessionOptions, TuningSession};
