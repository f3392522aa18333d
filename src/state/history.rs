// src/state/history.rs

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::StageId;
use crate::trigger::TriggerReason;

/// Default number of execution records kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Terminal outcome of one stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    Failed,
}

/// Immutable record of one finished execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub stage_id: StageId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub trigger_reason: TriggerReason,
    #[serde(default)]
    pub error: Option<String>,
}

/// Bounded, append-only execution history.
///
/// Holds at most `capacity` records; appending beyond that evicts the oldest.
#[derive(Debug)]
pub struct HistoryLog {
    capacity: usize,
    records: Mutex<VecDeque<ExecutionRecord>>,
}

impl HistoryLog {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ExecutionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn append(&self, record: ExecutionRecord) {
        let mut records = self.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Up to `limit` records, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    /// All retained records, oldest first.
    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Replace the contents with previously persisted records (oldest
    /// first), keeping only the newest `capacity`.
    pub fn restore(&self, persisted: Vec<ExecutionRecord>) {
        let mut records = self.lock();
        records.clear();
        let skip = persisted.len().saturating_sub(self.capacity);
        records.extend(persisted.into_iter().skip(skip));
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
