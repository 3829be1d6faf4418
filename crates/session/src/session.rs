//! Tuning session orchestration.

use crate::env::engine_config_from_env;
use anyhow::{ensure, Result};
use ndarray::Array2;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tunecache_autotune::{
    Autotuner, BenchMode, CacheKey, ConfigurationSpace, EngineConfig, JsonFileStore, MemoryStore,
    Store, StoredTable, Timing, TunerOptions,
};
use tunecache_kernels::{Configuration, DataType, Kernel, KernelArgs, Params, Tensor, TiledMatmul};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Directory of the JSON decision store; in-memory when unset.
    pub store_dir: Option<PathBuf>,
    pub warmup_runs: usize,
    pub runs: usize,
    pub clear_store: bool,
    pub bench_mode: BenchMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            store_dir: None,
            warmup_runs: 25,
            runs: 100,
            clear_store: false,
            bench_mode: BenchMode::Direct,
        }
    }
}

/// Owns the decision store and hands out autotuners that share it.
pub struct TuningSession {
    options: SessionOptions,
    engine: EngineConfig,
    store: Arc<dyn Store>,
    json_store: Option<Arc<JsonFileStore>>,
}

impl TuningSession {
    /// Builds a session whose engine switches come from `TUNECACHE_*`.
    pub fn new(options: SessionOptions) -> Result<Self> {
        Self::with_engine(options, engine_config_from_env())
    }

    pub fn with_engine(options: SessionOptions, engine: EngineConfig) -> Result<Self> {
        ensure!(options.runs > 0, "runs must be at least 1");

        let json_store = match &options.store_dir {
            Some(dir) => {
                let store = JsonFileStore::new(dir);
                if options.clear_store {
                    info!(path = %dir.display(), "clearing decision store");
                    store.clear()?;
                }
                Some(Arc::new(store))
            }
            None => None,
        };
        let store: Arc<dyn Store> = match &json_store {
            Some(store) => store.clone() as Arc<dyn Store>,
            None => Arc::new(MemoryStore::new()),
        };

        Ok(Self {
            options,
            engine,
            store,
            json_store,
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn engine(&self) -> EngineConfig {
        self.engine
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Wraps `kernel` in an autotuner that uses this session's store, run
    /// counts and bench mode.
    pub fn tuner<K: Kernel>(&self, kernel: K, options: TunerOptions) -> Result<Autotuner<K>> {
        let options = options
            .with_runs(self.options.warmup_runs, self.options.runs)
            .with_bench_mode(self.options.bench_mode);
        Ok(Autotuner::new(kernel, options, self.store.clone(), self.engine)?)
    }

    pub fn matmul_tuner(
        &self,
        space: ConfigurationSpace,
        kernel: TiledMatmul,
    ) -> Result<Autotuner<TiledMatmul>> {
        self.tuner(kernel, TunerOptions::new(["m", "n", "k"]).with_space(space))
    }

    pub fn execute_matmul(
        &self,
        tuner: &Autotuner<TiledMatmul>,
        lhs: &Array2<f32>,
        rhs: &Array2<f32>,
    ) -> Result<MatmulResult> {
        let (m, k) = lhs.dim();
        let n = rhs.ncols();
        let args = KernelArgs::new()
            .tensor("lhs", Tensor::new(DataType::F32, lhs.clone().into_dyn()))
            .tensor("rhs", Tensor::new(DataType::F32, rhs.clone().into_dyn()))
            .scalar("m", m)
            .scalar("n", n)
            .scalar("k", k);
        let kwargs = Params::new();

        let key = tuner.key_for(&args, &kwargs)?;
        let output = tuner.dispatch(&args, &kwargs)?;
        let result = MatmulResult {
            output,
            config: tuner.best_config(),
            timing: tuner.cached_timing(&key),
            key,
        };
        info!(
            m,
            n,
            k,
            config = %result.config.as_ref().map(ToString::to_string).unwrap_or_default(),
            "matmul completed"
        );
        Ok(result)
    }

    /// Every table in the JSON store; empty for in-memory sessions.
    pub fn stored_tables(&self) -> Result<Vec<StoredTable>> {
        match &self.json_store {
            Some(store) => store.tables(),
            None => Ok(Vec::new()),
        }
    }
}

/// Blocks from 32 to 128 per side; the largest tiles exceed the default
/// scratch limit and are rejected while benchmarking.
pub fn default_matmul_space() -> ConfigurationSpace {
    ConfigurationSpace::new()
        .param("BLOCK_M", [32, 64, 128])
        .param("BLOCK_N", [32, 64, 128])
        .param("BLOCK_K", [32, 128])
        .num_warps([4])
}

pub struct MatmulResult {
    pub output: Array2<f32>,
    pub key: CacheKey,
    pub config: Option<Configuration>,
    /// Winner timing, when the key was resolved by this process.
    pub timing: Option<Timing>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(store_dir: Option<PathBuf>) -> SessionOptions {
        SessionOptions {
            store_dir,
            warmup_runs: 0,
            runs: 1,
            ..SessionOptions::default()
        }
    }

    #[test]
    fn matmul_matches_the_reference_product() -> Result<()> {
        let session = TuningSession::with_engine(quick(None), EngineConfig::default())?;
        let space = ConfigurationSpace::new()
            .param("BLOCK_M", [2, 4])
            .param("BLOCK_N", [4])
            .param("BLOCK_K", [2]);
        let tuner = session.matmul_tuner(space, TiledMatmul::new())?;

        let lhs = Array2::from_shape_fn((5, 3), |(i, j)| (i + j) as f32);
        let rhs = Array2::from_shape_fn((3, 6), |(i, j)| (i * j) as f32 + 1.0);
        let result = session.execute_matmul(&tuner, &lhs, &rhs)?;

        assert_eq!(result.output, lhs.dot(&rhs));
        assert!(result.config.is_some());
        assert!(result.timing.is_some());
        assert_eq!(result.key.to_string(), "(5, 6, 3, 'f32', 'f32')");
        Ok(())
    }

    #[test]
    fn json_sessions_share_decisions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lhs = Array2::from_elem((8, 8), 1.0f32);
        let rhs = Array2::from_elem((8, 8), 2.0f32);
        let space = || {
            ConfigurationSpace::new()
                .param("BLOCK_M", [4, 8])
                .param("BLOCK_N", [8])
                .param("BLOCK_K", [8])
        };
        let options = quick(Some(dir.path().to_path_buf()));

        let first = TuningSession::with_engine(options.clone(), EngineConfig::default())?;
        let tuner = first.matmul_tuner(space(), TiledMatmul::new())?;
        first.execute_matmul(&tuner, &lhs, &rhs)?;
        assert_eq!(first.stored_tables()?.len(), 1);

        let second = TuningSession::with_engine(options, EngineConfig::default())?;
        let restored = second.matmul_tuner(space(), TiledMatmul::new())?;
        assert_eq!(restored.cache_len(), 1);
        let result = second.execute_matmul(&restored, &lhs, &rhs)?;
        // Restored decisions carry no in-process timing.
        assert!(result.timing.is_none());
        assert_eq!(result.output, lhs.dot(&rhs));
        Ok(())
    }

    #[test]
    fn clear_store_starts_fresh() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let options = quick(Some(dir.path().to_path_buf()));
        let session = TuningSession::with_engine(options.clone(), EngineConfig::default())?;
        let tuner = session.matmul_tuner(default_matmul_space(), TiledMatmul::new())?;
        session.execute_matmul(&tuner, &Array2::zeros((4, 4)), &Array2::zeros((4, 4)))?;

        let cleared = TuningSession::with_engine(
            SessionOptions {
                clear_store: true,
                ..options
            },
            EngineConfig::default(),
        )?;
        assert!(cleared.stored_tables()?.is_empty());
        Ok(())
    }

    #[test]
    fn zero_runs_is_rejected() {
        let options = SessionOptions {
            runs: 0,
            ..SessionOptions::default()
        };
        assert!(TuningSession::with_engine(options, EngineConfig::default()).is_err());
    }
}
