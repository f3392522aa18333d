// src/state/persist.rs

//! Optional on-disk snapshot of stage state and history.
//!
//! The snapshot is a single JSON document rewritten after every finished
//! execution and at shutdown. Its main job is keeping `Completed` markers
//! across process restarts so dependents do not wait on stages that already
//! ran.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dag::StageId;
use crate::errors::{Result, StagedagError};
use crate::fs::FileSystem;
use crate::state::history::{ExecutionRecord, HistoryLog};
use crate::state::store::{StageSnapshot, StageStateStore};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub stages: BTreeMap<StageId, StageSnapshot>,
    #[serde(default)]
    pub history: Vec<ExecutionRecord>,
}

/// Reads and writes [`PersistedState`] at a fixed path.
#[derive(Debug)]
pub struct StatePersister {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    /// Serializes writers so concurrent completions do not interleave.
    write_lock: Mutex<()>,
}

impl StatePersister {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current store and history contents.
    pub fn save(&self, store: &StageStateStore, history: &HistoryLog, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let state = PersistedState {
            version: FORMAT_VERSION,
            saved_at: now,
            stages: store.snapshot(),
            history: history.all(),
        };
        let bytes = serde_json::to_vec_pretty(&state)?;
        self.fs.write(&self.path, &bytes)?;

        debug!(path = ?self.path, stages = state.stages.len(), "persisted stage state");
        Ok(())
    }

    /// Read the snapshot, if one exists.
    pub fn load(&self) -> Result<Option<PersistedState>> {
        if !self.fs.exists(&self.path) {
            return Ok(None);
        }

        let contents = self.fs.read_to_string(&self.path)?;
        let state: PersistedState = serde_json::from_str(&contents)?;
        if state.version != FORMAT_VERSION {
            return Err(StagedagError::ConfigError(format!(
                "state file {:?} has unsupported version {} (expected {})",
                self.path, state.version, FORMAT_VERSION
            )));
        }
        Ok(Some(state))
    }

    /// Load the snapshot into `store` and `history`. Returns whether anything
    /// was restored.
    pub fn restore_into(&self, store: &StageStateStore, history: &HistoryLog) -> Result<bool> {
        let Some(state) = self.load()? else {
            return Ok(false);
        };

        info!(
            path = ?self.path,
            saved_at = %state.saved_at,
            stages = state.stages.len(),
            records = state.history.len(),
            "restoring persisted stage state"
        );
        store.restore(state.stages);
        history.restore(state.history);
        Ok(true)
    }
}
