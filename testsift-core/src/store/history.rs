use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::persist::{self, FORMAT_VERSION, LoadOutcome, Versioned};
use crate::error::StoreError;
use crate::types::EpochMillis;

/// One `(path, last run)` record as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub path: String,
    pub last_run_millis: EpochMillis,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    records: Vec<RunRecord>,
}

impl Versioned for HistoryFile {
    fn version(&self) -> u32 {
        self.version
    }
}

/// Last successfully processed time of every scanned source file.
///
/// Keys are canonical path strings produced by [`crate::scan::path_key`], so
/// one physical file never gets two records.
#[derive(Debug, Clone, Default)]
pub struct RunHistoryStore {
    records: BTreeMap<String, EpochMillis>,
    load_outcome: LoadOutcome,
}

impl RunHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the history at `location`. Missing or unreadable files yield an
    /// empty store; see [`Self::load_outcome`].
    #[instrument(skip_all, name = "history_load")]
    pub fn load(location: &Path) -> Self {
        let (file, load_outcome) = persist::read_json::<HistoryFile>(location, "run_history");
        let records = file
            .map(|f| {
                f.records
                    .into_iter()
                    .map(|r| (r.path, r.last_run_millis))
                    .collect()
            })
            .unwrap_or_default();
        let store = Self {
            records,
            load_outcome,
        };
        debug!(records = store.len(), path = %location.display(), "Run history ready");
        store
    }

    pub fn get(&self, key: &str) -> Option<EpochMillis> {
        self.records.get(key).copied()
    }

    /// Record `millis` as the last run time for `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, millis: EpochMillis) {
        self.records.insert(key.into(), millis);
    }

    pub fn remove(&mut self, key: &str) -> Option<EpochMillis> {
        self.records.remove(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, EpochMillis)> {
        self.records.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.load_outcome
    }

    /// Oldest and newest recorded run times.
    pub fn time_range(&self) -> Option<(EpochMillis, EpochMillis)> {
        let min = self.records.values().min()?;
        let max = self.records.values().max()?;
        Some((*min, *max))
    }

    /// Drop records whose file no longer exists. Returns how many were removed.
    pub fn prune_missing(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|key, _| Path::new(key).exists());
        let pruned = before - self.records.len();
        if pruned > 0 {
            debug!(pruned, "Pruned history records of deleted files");
        }
        pruned
    }

    /// Write the full mapping to `location`.
    #[instrument(skip_all, name = "history_save")]
    pub fn save(&self, location: &Path) -> Result<(), StoreError> {
        let file = HistoryFile {
            version: FORMAT_VERSION,
            saved_at: Some(Utc::now()),
            records: self
                .records
                .iter()
                .map(|(path, millis)| RunRecord {
                    path: path.clone(),
                    last_run_millis: *millis,
                })
                .collect(),
        };
        persist::write_json_atomic(location, &file)?;
        debug!(records = self.len(), path = %location.display(), "Run history saved");
        Ok(())
    }
}
