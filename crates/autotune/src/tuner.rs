//! The decision engine: resolves one configuration per cache key and
//! dispatches through it.

use crate::bench::{fastest, Benchmarker, Measurement, Timing};
use crate::error::{Result, TuneError};
use crate::hooks::{HookMode, PostDispatchHook, PreDispatchHook, ResetRestore};
use crate::identity::{hash_configurations, hash_str, CacheIdentity};
use crate::key::{CacheKey, KeySpec};
use crate::options::{EngineConfig, TunerOptions};
use crate::prune::PruneSpec;
use crate::store::{Store, TuningRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tunecache_kernels::{ArgView, Configuration, Kernel, KernelArgs, LaunchRequest, Params};

#[derive(Default)]
struct TunerState {
    cache: HashMap<CacheKey, Configuration>,
    timings: HashMap<CacheKey, Timing>,
    configs_timings: Option<Vec<(Configuration, Timing)>>,
    best_config: Option<Configuration>,
    bench_time: Option<Duration>,
}

/// Memoizing autotuner wrapped around one kernel.
///
/// Each distinct [`CacheKey`] is benchmarked at most once per engine. Winners
/// go to the in-memory cache and to the [`Store`]; later calls with the same
/// key dispatch straight through. Resolution passes are serialized behind one
/// engine-wide lock and the cache is re-checked after acquiring it, so
/// concurrent callers missing on the same key share a single pass.
pub struct Autotuner<K: Kernel> {
    kernel: K,
    configs: Vec<Configuration>,
    /// Size of the full list, kept when restricted replay narrows `configs`.
    candidate_count: usize,
    identity: CacheIdentity,
    key: KeySpec,
    prune: Option<PruneSpec>,
    pre_hook: Arc<dyn PreDispatchHook>,
    post_hook: Arc<dyn PostDispatchHook>,
    bench: Benchmarker,
    store: Arc<dyn Store>,
    engine: EngineConfig,
    state: Mutex<TunerState>,
    tuning: Mutex<()>,
}

impl<K: Kernel> Autotuner<K> {
    pub fn new(
        kernel: K,
        options: TunerOptions,
        store: Arc<dyn Store>,
        engine: EngineConfig,
    ) -> Result<Self> {
        let params_descriptor = options.params_descriptor();
        let has_custom_hooks = options.has_custom_hooks();
        let TunerOptions {
            key,
            configs,
            space,
            reset_to_zero,
            restore_value,
            pre_hook,
            post_hook,
            prune,
            warmup,
            rep,
            bench_mode,
        } = options;

        let configs = match (configs, space) {
            (Some(_), Some(_)) => return Err(TuneError::ConfigsAndSpace),
            (Some(configs), None) => configs,
            (None, Some(space)) => space.generate()?,
            (None, None) => vec![Configuration::default()],
        };

        let kernel_name = kernel.name().to_string();
        key.validate(&kernel_name, kernel.arg_names())?;
        KeySpec::new(reset_to_zero.iter().chain(&restore_value).cloned())
            .validate(&kernel_name, kernel.arg_names())?;

        let identity = CacheIdentity {
            kernel: kernel_name.clone(),
            configs_hash: hash_configurations(&configs),
            key_hash: key.identity_hash(),
            params_hash: hash_str(&params_descriptor),
        };

        let builtin = Arc::new(ResetRestore::new(&reset_to_zero, &restore_value));
        let pre_hook = match pre_hook {
            Some(hook) => hook,
            None => builtin.clone() as Arc<dyn PreDispatchHook>,
        };
        let post_hook = match post_hook {
            Some(hook) => hook,
            None => builtin as Arc<dyn PostDispatchHook>,
        };

        if prune.is_some() {
            warn!(
                kernel = %kernel_name,
                "pruning is enabled; cached decisions may not reflect the fastest configuration"
            );
        }
        debug!(
            kernel = %kernel_name,
            identity = %identity,
            custom_hooks = has_custom_hooks,
            "created autotuner"
        );

        let mut tuner = Self {
            kernel,
            candidate_count: configs.len(),
            configs,
            identity,
            key,
            prune,
            pre_hook,
            post_hook,
            bench: Benchmarker::new(bench_mode, warmup, rep),
            store,
            engine,
            state: Mutex::new(TunerState::default()),
            tuning: Mutex::new(()),
        };
        tuner.report("generated configurations", tuner.configs.len());
        tuner.restore_from_store()?;
        Ok(tuner)
    }

    fn restore_from_store(&mut self) -> Result<()> {
        if self.engine.use_only_restored {
            let used = self
                .store
                .used_configurations(&self.identity)
                .map_err(TuneError::Store)?;
            let restricted: Vec<Configuration> = self
                .configs
                .iter()
                .filter(|config| used.contains(config))
                .cloned()
                .collect();
            if restricted.is_empty() {
                warn!(
                    kernel = self.kernel.name(),
                    "no stored decisions to restrict to; keeping every configuration"
                );
            } else {
                self.configs = restricted;
                self.report("restricted configurations to stored winners", self.configs.len());
            }
        }

        let restored = self.store.restore(&self.identity).map_err(TuneError::Store)?;
        if restored.is_empty() {
            return Ok(());
        }
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (key, stored) in restored {
            // Stored configurations carry no hooks; rebind to the live ones.
            let live = self
                .configs
                .iter()
                .find(|config| **config == stored)
                .cloned()
                .unwrap_or(stored);
            state.cache.insert(key, live);
        }
        let count = state.cache.len();
        self.report("restored cached decisions", count);
        Ok(())
    }

    fn report(&self, message: &str, count: usize) {
        if self.engine.debug {
            info!(kernel = self.kernel.name(), count, "{message}");
        } else {
            debug!(kernel = self.kernel.name(), count, "{message}");
        }
    }

    fn state(&self) -> MutexGuard<'_, TunerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the kernel with the configuration resolved for this call's key,
    /// benchmarking the candidates first if the key has not been seen.
    pub fn dispatch(&self, args: &KernelArgs, kwargs: &Params) -> Result<K::Output> {
        if let [only] = self.configs.as_slice() {
            return self.launch(args, kwargs, only);
        }

        let key = self.key.derive(args, kwargs)?;
        let config = match self.cached_config(&key) {
            Some(config) => config,
            None => self.resolve(&key, args, kwargs)?,
        };
        self.launch(args, kwargs, &config)
    }

    fn resolve(&self, key: &CacheKey, args: &KernelArgs, kwargs: &Params) -> Result<Configuration> {
        let _tuning = self.tuning.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(config) = self.cached_config(key) {
            return Ok(config);
        }

        let started = Instant::now();
        let candidates = self.prune(args, kwargs)?;
        for config in &candidates {
            check_conflicts(kwargs, config)?;
        }

        let mut timings = Vec::with_capacity(candidates.len());
        for config in &candidates {
            let measurement = self.benchmark(args, config, kwargs)?;
            timings.push(measurement.into_timing(self.bench.mode));
        }
        let bench_time = started.elapsed();

        let winner = match fastest(&timings) {
            Some(idx) if !timings[idx].is_failure() => idx,
            best => {
                return Err(TuneError::AllConfigurationsFailed {
                    key: key.clone(),
                    timing: best
                        .map(|idx| timings[idx])
                        .unwrap_or_else(|| Timing::failed(self.bench.mode)),
                })
            }
        };
        let best = candidates[winner].clone();
        let best_timing = timings[winner];

        let (cache, cached_timings) = {
            let mut state = self.state();
            state.cache.insert(key.clone(), best.clone());
            state.timings.insert(key.clone(), best_timing);
            state.configs_timings = Some(candidates.into_iter().zip(timings).collect());
            state.bench_time = Some(bench_time);
            (state.cache.clone(), state.timings.clone())
        };
        self.store
            .save(&TuningRecord {
                identity: &self.identity,
                cache: &cache,
                timings: &cached_timings,
                candidate_count: self.candidate_count,
                repeat_count: self.bench.rep,
                warmup_count: self.bench.warmup,
                bench_time,
            })
            .map_err(TuneError::Store)?;

        if self.engine.print_autotuning {
            info!(
                kernel = self.kernel.name(),
                key = %key,
                config = %best,
                timing = %best_timing,
                elapsed_s = bench_time.as_secs_f64(),
                "autotuning finished"
            );
        }

        self.pre_hook
            .pre_dispatch(args, HookMode::ResetOnly)
            .map_err(TuneError::Hook)?;
        Ok(best)
    }

    fn launch(&self, args: &KernelArgs, kwargs: &Params, config: &Configuration) -> Result<K::Output> {
        check_conflicts(kwargs, config)?;
        let request = LaunchRequest::merged(kwargs, config);
        if let Some(hook) = config.pre_hook() {
            let params = request.flattened();
            hook.call(&ArgView::new(args, &params)).map_err(TuneError::Hook)?;
        }
        self.state().best_config = Some(config.clone());
        Ok(self.kernel.run(args, &request)?)
    }

    /// The candidates worth benchmarking for this call.
    pub fn prune(&self, args: &KernelArgs, kwargs: &Params) -> Result<Vec<Configuration>> {
        let Some(prune) = &self.prune else {
            return Ok(self.configs.clone());
        };
        let pruned = prune.apply(&self.configs, args, kwargs)?;
        if pruned.len() != self.configs.len() {
            self.report("pruned configurations", pruned.len());
        }
        Ok(pruned)
    }

    /// Times one configuration. Per trial: the configuration's pre-hook, the
    /// engine pre-dispatch hook, the kernel, the engine post-dispatch hook.
    pub fn benchmark(
        &self,
        args: &KernelArgs,
        config: &Configuration,
        kwargs: &Params,
    ) -> Result<Measurement> {
        check_conflicts(kwargs, config)?;
        let request = LaunchRequest::merged(kwargs, config);
        let params = request.flattened();
        self.bench.measure(|| self.trial(args, config, &request, &params))
    }

    fn trial(
        &self,
        args: &KernelArgs,
        config: &Configuration,
        request: &LaunchRequest,
        params: &Params,
    ) -> Result<()> {
        if let Some(hook) = config.pre_hook() {
            hook.call(&ArgView::new(args, params)).map_err(TuneError::Hook)?;
        }
        self.pre_hook
            .pre_dispatch(args, HookMode::Trial)
            .map_err(TuneError::Hook)?;
        let outcome = self.kernel.run(args, request);
        let restored = self.post_hook.post_dispatch(args).map_err(TuneError::Hook);
        outcome?;
        restored
    }

    /// Compiles every pruned candidate without running it. Candidates the
    /// kernel rejects are skipped.
    pub fn warmup(&self, args: &KernelArgs, kwargs: &Params) -> Result<()> {
        for config in self.prune(args, kwargs)? {
            let request = LaunchRequest::merged(kwargs, &config);
            match self.kernel.warmup(args, &request) {
                Ok(()) => {}
                Err(err) if err.is_configuration_failure() => {
                    debug!(config = %config, error = %err, "skipping candidate during warmup");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// The active candidate list.
    pub fn configs(&self) -> &[Configuration] {
        &self.configs
    }

    pub fn identity(&self) -> &CacheIdentity {
        &self.identity
    }

    pub fn cached_config(&self, key: &CacheKey) -> Option<Configuration> {
        self.state().cache.get(key).cloned()
    }

    /// Winner timing for `key`, if it was resolved in this process.
    pub fn cached_timing(&self, key: &CacheKey) -> Option<Timing> {
        self.state().timings.get(key).copied()
    }

    pub fn cache_len(&self) -> usize {
        self.state().cache.len()
    }

    /// Configuration of the most recent dispatch.
    pub fn best_config(&self) -> Option<Configuration> {
        self.state().best_config.clone()
    }

    /// Every candidate timing of the most recent resolution.
    pub fn configs_timings(&self) -> Option<Vec<(Configuration, Timing)>> {
        self.state().configs_timings.clone()
    }

    /// Wall time of the most recent resolution.
    pub fn bench_time(&self) -> Option<Duration> {
        self.state().bench_time
    }

    /// Derives the cache key this call would use.
    pub fn key_for(&self, args: &KernelArgs, kwargs: &Params) -> Result<CacheKey> {
        self.key.derive(args, kwargs)
    }
}

fn check_conflicts(kwargs: &Params, config: &Configuration) -> Result<()> {
    let conflicts: Vec<String> = config
        .all_params()
        .into_keys()
        .filter(|name| kwargs.contains_key(name))
        .collect();
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(TuneError::ConflictingParameters(conflicts))
    }
}
