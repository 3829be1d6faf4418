//! Persistence boundary for resolved decisions.

use crate::bench::Timing;
use crate::identity::CacheIdentity;
use crate::key::CacheKey;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tunecache_kernels::Configuration;

/// Snapshot of one engine's cache, pushed after every resolution.
#[derive(Debug, Clone, Copy)]
pub struct TuningRecord<'a> {
    pub identity: &'a CacheIdentity,
    pub cache: &'a HashMap<CacheKey, Configuration>,
    pub timings: &'a HashMap<CacheKey, Timing>,
    pub candidate_count: usize,
    pub repeat_count: usize,
    pub warmup_count: usize,
    pub bench_time: Duration,
}

/// Cross-process decision store. Entries are shared by overwrite-by-key.
pub trait Store: Send + Sync {
    fn restore(&self, identity: &CacheIdentity) -> Result<HashMap<CacheKey, Configuration>>;

    fn save(&self, record: &TuningRecord<'_>) -> Result<()>;

    /// Distinct configurations that won for any key under `identity`.
    fn used_configurations(&self, identity: &CacheIdentity) -> Result<Vec<Configuration>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub config: Configuration,
    #[serde(default)]
    pub timing: Option<Timing>,
}

/// On-disk form of one identity's decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTable {
    pub identity: CacheIdentity,
    pub candidate_count: usize,
    pub repeat_count: usize,
    pub warmup_count: usize,
    pub total_bench_time_s: f64,
    pub entries: Vec<StoredEntry>,
}

impl StoredTable {
    pub fn new(identity: CacheIdentity) -> Self {
        Self {
            identity,
            candidate_count: 0,
            repeat_count: 0,
            warmup_count: 0,
            total_bench_time_s: 0.0,
            entries: Vec::new(),
        }
    }

    /// Folds a record in; keys already present are overwritten. A key the
    /// record carries no timing for keeps its stored timing while its
    /// configuration is unchanged.
    pub fn merge(&mut self, record: &TuningRecord<'_>) {
        self.candidate_count = record.candidate_count;
        self.repeat_count = record.repeat_count;
        self.warmup_count = record.warmup_count;
        self.total_bench_time_s += record.bench_time.as_secs_f64();

        let mut keys: Vec<&CacheKey> = record.cache.keys().collect();
        keys.sort_by_key(|key| key.to_string());
        for key in keys {
            let config = &record.cache[key];
            let timing = record
                .timings
                .get(key)
                .copied()
                .filter(|timing| !timing.is_failure());
            match self.entries.iter_mut().find(|existing| existing.key == *key) {
                Some(existing) => {
                    if timing.is_some() || existing.config != *config {
                        existing.timing = timing;
                    }
                    existing.config = config.clone();
                }
                None => self.entries.push(StoredEntry {
                    key: key.clone(),
                    config: config.clone(),
                    timing,
                }),
            }
        }
    }

    pub fn decisions(&self) -> HashMap<CacheKey, Configuration> {
        self.entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.config.clone()))
            .collect()
    }

    pub fn used_configurations(&self) -> Vec<Configuration> {
        let mut used: Vec<Configuration> = Vec::new();
        for entry in &self.entries {
            if !used.contains(&entry.config) {
                used.push(entry.config.clone());
            }
        }
        used
    }
}

/// In-process store; counts saves so callers can observe write traffic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<CacheIdentity, StoredTable>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn table(&self, identity: &CacheIdentity) -> Option<StoredTable> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }
}

impl Store for MemoryStore {
    fn restore(&self, identity: &CacheIdentity) -> Result<HashMap<CacheKey, Configuration>> {
        Ok(self
            .table(identity)
            .map(|table| table.decisions())
            .unwrap_or_default())
    }

    fn save(&self, record: &TuningRecord<'_>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(record.identity.clone())
            .or_insert_with(|| StoredTable::new(record.identity.clone()))
            .merge(record);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn used_configurations(&self, identity: &CacheIdentity) -> Result<Vec<Configuration>> {
        Ok(self
            .table(identity)
            .map(|table| table.used_configurations())
            .unwrap_or_default())
    }
}
