use anyhow::Result;
use std::sync::Arc;
use tunecache::kernels::{AccumulateKernel, DataType, Tensor};
use tunecache::session::engine_config_from_lookup;
use tunecache::{
    Autotuner, ConfigurationSpace, EngineConfig, JsonFileStore, KernelArgs, Params, SessionOptions,
    Store, TunerOptions, TuningSession,
};

fn accumulate_args(n: usize) -> (Tensor, KernelArgs) {
    let acc = Tensor::zeros(DataType::F32, &[n]);
    let args = KernelArgs::new()
        .tensor("acc", acc.clone())
        .tensor("x", Tensor::from_vec(DataType::F32, vec![1.0; n]))
        .scalar("n", n);
    (acc, args)
}

fn accumulate_options() -> TunerOptions {
    TunerOptions::new(["n"])
        .with_space(ConfigurationSpace::new().param("BLOCK", [1, 4, 16]))
        .with_reset_to_zero(["acc"])
        .with_runs(1, 2)
}

fn accumulate_tuner(
    store: Arc<dyn Store>,
    engine: EngineConfig,
) -> Result<Autotuner<AccumulateKernel>> {
    Ok(Autotuner::new(AccumulateKernel::new(), accumulate_options(), store, engine)?)
}

#[test]
fn decisions_persist_across_engines() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store: Arc<dyn Store> = Arc::new(JsonFileStore::new(dir.path()));

    let first = accumulate_tuner(store.clone(), EngineConfig::default())?;
    let (acc, args) = accumulate_args(32);
    first.dispatch(&args, &Params::new())?;
    assert_eq!(acc.to_vec(), vec![1.0; 32]);
    let winner = first.best_config().expect("dispatched");

    let second = accumulate_tuner(store, EngineConfig::default())?;
    assert_eq!(second.identity(), first.identity());
    assert_eq!(second.cache_len(), 1);
    let key = second.key_for(&args, &Params::new())?;
    assert_eq!(second.cached_config(&key), Some(winner));
    assert!(second.cached_timing(&key).is_none());
    Ok(())
}

#[test]
fn restricted_replay_uses_only_stored_winners() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store: Arc<dyn Store> = Arc::new(JsonFileStore::new(dir.path()));

    let first = accumulate_tuner(store.clone(), EngineConfig::default())?;
    for n in [8, 64] {
        let (_, args) = accumulate_args(n);
        first.dispatch(&args, &Params::new())?;
    }
    let used = store.used_configurations(first.identity())?;
    assert!(!used.is_empty() && used.len() <= 2);

    let engine = engine_config_from_lookup(|name| {
        (name == "TUNECACHE_USE_ONLY_RESTORED").then(|| "1".to_string())
    });
    let restricted = accumulate_tuner(store, engine)?;
    assert_eq!(restricted.configs().len(), used.len());
    assert!(restricted.configs().iter().all(|config| used.contains(config)));
    assert_eq!(restricted.identity(), first.identity());
    Ok(())
}

#[test]
fn session_store_is_visible_to_show_cache() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let options = SessionOptions {
        store_dir: Some(dir.path().join("decisions")),
        warmup_runs: 0,
        runs: 1,
        ..SessionOptions::default()
    };
    let session = TuningSession::with_engine(options, EngineConfig::default())?;
    let tuner = session.tuner(AccumulateKernel::new(), accumulate_options())?;
    let (_, args) = accumulate_args(16);
    tuner.dispatch(&args, &Params::new())?;

    let tables = session.stored_tables()?;
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].identity.kernel, "accumulate");
    assert_eq!(tables[0].entries.len(), 1);
    assert_eq!(tables[0].warmup_count, 0);
    assert_eq!(tables[0].repeat_count, 1);
    Ok(())
}
