// src/api/control.rs

//! Library-level control surface. The HTTP handlers are thin wrappers
//! around these methods.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::error::{ApiError, ApiResult};
use crate::clock::Clock;
use crate::dag::{DependencyGraph, StageId};
use crate::engine::SchedulerEvent;
use crate::state::{
    ExecutionRecord, HistoryLog, StageSnapshot, StageState, StageStateStore, StatePersister,
    TriggerAck,
};
use crate::trigger::TriggerReason;

/// Default number of records returned by [`ControlApi::history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-stage entry of [`StatusReport`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    pub state: StageState,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_reason: Option<TriggerReason>,
    pub consecutive_failures: u32,
}

impl From<StageSnapshot> for StageStatus {
    fn from(s: StageSnapshot) -> Self {
        Self {
            state: s.state,
            last_run_started_at: s.last_run_started_at,
            last_run_finished_at: s.last_run_finished_at,
            last_error: s.last_error,
            pending_reason: s.pending_reason,
            consecutive_failures: s.consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub stages: BTreeMap<StageId, StageStatus>,
    /// Whether any stage is currently `Running`.
    pub is_running: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RestartReport {
    pub reset: Vec<StageId>,
}

/// Query and control operations over a running orchestrator.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ControlApi {
    graph: Arc<DependencyGraph>,
    store: Arc<StageStateStore>,
    history: Arc<HistoryLog>,
    events: mpsc::Sender<SchedulerEvent>,
    clock: Arc<dyn Clock>,
    persister: Option<Arc<StatePersister>>,
}

impl std::fmt::Debug for ControlApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlApi")
            .field("stages", &self.graph.len())
            .finish_non_exhaustive()
    }
}

impl ControlApi {
    pub fn new(
        graph: Arc<DependencyGraph>,
        store: Arc<StageStateStore>,
        history: Arc<HistoryLog>,
        events: mpsc::Sender<SchedulerEvent>,
        clock: Arc<dyn Clock>,
        persister: Option<Arc<StatePersister>>,
    ) -> Self {
        Self {
            graph,
            store,
            history,
            events,
            clock,
            persister,
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            timestamp: self.clock.now(),
        }
    }

    pub fn status(&self) -> StatusReport {
        let snapshot = self.store.snapshot();
        let is_running = snapshot.values().any(|s| s.state == StageState::Running);
        StatusReport {
            stages: snapshot
                .into_iter()
                .map(|(id, s)| (id, StageStatus::from(s)))
                .collect(),
            is_running,
        }
    }

    /// Request a manual run of `stage_id`.
    ///
    /// A no-op returning `accepted: false` when the stage is already
    /// `Pending` or `Running`.
    pub fn trigger(&self, stage_id: &str) -> ApiResult<TriggerAck> {
        if !self.graph.contains(stage_id) {
            return Err(ApiError::NotFound(stage_id.to_string()));
        }

        let ack = self
            .store
            .request_manual(stage_id)
            .ok_or_else(|| ApiError::NotFound(stage_id.to_string()))?;

        if ack.accepted {
            info!(stage = %stage_id, "manual trigger accepted");
            // A full channel only delays the run until the next tick.
            let _ = self.events.try_send(SchedulerEvent::TriggerRequested {
                stage: stage_id.to_string(),
            });
        } else {
            debug!(stage = %stage_id, state = %ack.current_state, "manual trigger ignored");
        }
        Ok(ack)
    }

    /// Most recent records first; `limit` defaults to
    /// [`DEFAULT_HISTORY_LIMIT`] and is clamped to the log capacity.
    pub fn history(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(self.history.capacity());
        self.history.recent(limit)
    }

    /// Reset every stage that is not `Running` to `Idle`.
    pub fn restart(&self) -> RestartReport {
        let reset = self.store.reset_all();
        debug!(?reset, "restart requested");

        if let Some(persister) = &self.persister {
            if let Err(err) = persister.save(&self.store, &self.history, self.clock.now()) {
                tracing::warn!(error = %err, "failed to persist state after restart");
            }
        }
        RestartReport { reset }
    }
}
