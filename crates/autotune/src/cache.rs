//! JSON-file decision store.

use crate::identity::CacheIdentity;
use crate::key::CacheKey;
use crate::store::{Store, StoredTable, TuningRecord};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use tunecache_kernels::Configuration;

/// One pretty-printed JSON table per identity, laid out as
/// `<root>/<kernel>/<configs_hash>-<key_hash>-<params_hash>.json`.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, identity: &CacheIdentity) -> PathBuf {
        self.root.join(sanitize(&identity.kernel)).join(format!(
            "{}-{}-{}.json",
            identity.configs_hash, identity.key_hash, identity.params_hash
        ))
    }

    pub fn load_table(&self, identity: &CacheIdentity) -> Result<Option<StoredTable>> {
        load_from_file(&self.path_for(identity))
    }

    /// Every table under the root, ordered by path.
    pub fn tables(&self) -> Result<Vec<StoredTable>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for kernel_dir in fs::read_dir(&self.root)? {
            let kernel_dir = kernel_dir?.path();
            if !kernel_dir.is_dir() {
                continue;
            }
            for file in fs::read_dir(&kernel_dir)? {
                let path = file?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    paths.push(path);
                }
            }
        }
        paths.sort();

        let mut tables = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(table) = load_from_file(&path)? {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    /// Removes every stored table.
    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("failed to clear {}", self.root.display()))?;
        }
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn restore(&self, identity: &CacheIdentity) -> Result<HashMap<CacheKey, Configuration>> {
        let decisions = self
            .load_table(identity)?
            .map(|table| table.decisions())
            .unwrap_or_default();
        debug!(identity = %identity, entries = decisions.len(), "restored decisions");
        Ok(decisions)
    }

    fn save(&self, record: &TuningRecord<'_>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.path_for(record.identity);
        let mut table =
            load_from_file(&path)?.unwrap_or_else(|| StoredTable::new(record.identity.clone()));
        table.merge(record);
        save_to_file(&table, &path)?;
        debug!(path = %path.display(), entries = table.entries.len(), "saved decisions");
        Ok(())
    }

    fn used_configurations(&self, identity: &CacheIdentity) -> Result<Vec<Configuration>> {
        Ok(self
            .load_table(identity)?
            .map(|table| table.used_configurations())
            .unwrap_or_default())
    }
}

fn load_from_file(path: &Path) -> Result<Option<StoredTable>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let table = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(table))
}

fn save_to_file(table: &StoredTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let blob = serde_json::to_vec_pretty(table)?;
    fs::write(path, blob).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::Timing;
    use crate::key::KeyPart;
    use crate::store::tests::identity;
    use std::time::Duration;

    fn record_one(store: &JsonFileStore, id: &CacheIdentity, n: i64, block: i64) -> Result<()> {
        let key = CacheKey(vec![KeyPart::Int(n)]);
        let cache = HashMap::from([(key.clone(), Configuration::default().with_param("BLOCK", block))]);
        let timings = HashMap::from([(key, Timing::Quantiles([1.0, 0.9, 1.1]))]);
        store.save(&TuningRecord {
            identity: id,
            cache: &cache,
            timings: &timings,
            candidate_count: 4,
            repeat_count: 10,
            warmup_count: 2,
            bench_time: Duration::from_millis(250),
        })
    }

    #[test]
    fn decisions_survive_a_new_store_instance() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let id = identity("tiled_matmul");
        record_one(&JsonFileStore::new(dir.path()), &id, 128, 32)?;

        let reopened = JsonFileStore::new(dir.path());
        let restored = reopened.restore(&id)?;
        assert_eq!(
            restored[&CacheKey(vec![KeyPart::Int(128)])],
            Configuration::default().with_param("BLOCK", 32)
        );
        assert!(reopened.path_for(&id).exists());
        Ok(())
    }

    #[test]
    fn saves_merge_into_the_existing_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileStore::new(dir.path());
        let id = identity("acc");
        record_one(&store, &id, 1, 16)?;
        record_one(&store, &id, 2, 16)?;
        record_one(&store, &id, 1, 64)?;

        let table = store.load_table(&id)?.expect("table written");
        assert_eq!(table.entries.len(), 2);
        assert_eq!(store.used_configurations(&id)?.len(), 2);
        assert!((table.total_bench_time_s - 0.75).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn identities_do_not_share_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileStore::new(dir.path());
        let id = identity("acc");
        let mut other = id.clone();
        other.params_hash = "q".repeat(64);
        record_one(&store, &id, 1, 16)?;

        assert!(store.restore(&other)?.is_empty());
        assert_eq!(store.tables()?.len(), 1);
        Ok(())
    }

    #[test]
    fn kernel_names_are_sanitized() {
        let store = JsonFileStore::new("/tmp/root");
        let path = store.path_for(&identity("ns::kernel/v2"));
        assert!(path.starts_with("/tmp/root/ns__kernel_v2"));
    }

    #[test]
    fn clear_removes_everything() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileStore::new(dir.path().join("cache"));
        record_one(&store, &identity("acc"), 1, 16)?;
        store.clear()?;
        assert!(store.tables()?.is_empty());
        Ok(())
    }
}
