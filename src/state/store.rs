// src/state/store.rs

//! The single source of truth for mutable per-stage state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dag::{DependencyGraph, StageId};
use crate::trigger::TriggerReason;

/// Lifecycle state of a stage.
///
/// ```text
/// Idle ──► Pending ──► Running ──► Completed
///   ▲         ▲                 └─► Failed
///   │         └──── Completed / Failed (new trigger, retry)
///   └── any state except Running (restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageState {
    Idle,
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageState {
    /// Whether `self -> to` is an edge of the stage state machine.
    pub fn can_transition_to(self, to: StageState) -> bool {
        use StageState::*;
        matches!(
            (self, to),
            (Idle | Completed | Failed, Pending)
                | (Pending, Running)
                | (Running, Completed | Failed)
                | (Pending | Completed | Failed, Idle)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, StageState::Pending | StageState::Running)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Point-in-time copy of one stage's mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    pub state: StageState,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    /// Finish time of the most recent *successful* run.
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Why the stage is `Pending`; taken when it starts running.
    pub pending_reason: Option<TriggerReason>,
    pub consecutive_failures: u32,
    /// Artifact fingerprints consumed by the most recent dispatch.
    #[serde(default)]
    pub artifact_fingerprints: BTreeMap<PathBuf, String>,
}

impl Default for StageSnapshot {
    fn default() -> Self {
        Self {
            state: StageState::Idle,
            last_run_started_at: None,
            last_run_finished_at: None,
            last_completed_at: None,
            last_error: None,
            pending_reason: None,
            consecutive_failures: 0,
            artifact_fingerprints: BTreeMap::new(),
        }
    }
}

/// Result of a manual trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAck {
    pub accepted: bool,
    pub current_state: StageState,
}

/// Synchronized per-stage state.
///
/// Every mutation takes the single internal lock, so compare-and-swap
/// transitions are atomic with respect to the scheduler loop and concurrent
/// control API calls. The lock is never held across an `.await`.
#[derive(Debug)]
pub struct StageStateStore {
    inner: Mutex<HashMap<StageId, StageSnapshot>>,
    /// Static copy of each stage's dependencies, checked under the lock when
    /// a stage enters `Running`.
    deps: HashMap<StageId, Vec<StageId>>,
    clock: Arc<dyn Clock>,
}

impl StageStateStore {
    /// Create a store with every stage of `graph` in `Idle`.
    pub fn new(graph: &DependencyGraph, clock: Arc<dyn Clock>) -> Self {
        let inner = graph
            .topological_order()
            .iter()
            .map(|id| (id.clone(), StageSnapshot::default()))
            .collect();
        let deps = graph
            .stages()
            .map(|s| (s.id.clone(), s.depends_on.clone()))
            .collect();

        Self {
            inner: Mutex::new(inner),
            deps,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StageId, StageSnapshot>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> Option<StageSnapshot> {
        self.lock().get(id).cloned()
    }

    pub fn state_of(&self, id: &str) -> Option<StageState> {
        self.lock().get(id).map(|s| s.state)
    }

    /// Consistent copy of every stage's state, taken under one lock.
    pub fn snapshot(&self) -> BTreeMap<StageId, StageSnapshot> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn any_running(&self) -> bool {
        self.lock().values().any(|s| s.state == StageState::Running)
    }

    /// Atomically move `id` from `from` to `to`.
    ///
    /// Succeeds only if the stage exists, is currently in `from`, and
    /// `from -> to` is a legal edge. Entering `Running` additionally requires
    /// every dependency to be `Completed` at this instant, which is what makes
    /// both single-flight and dependency ordering hold under races.
    pub fn try_transition(&self, id: &str, from: StageState, to: StageState) -> bool {
        let now = self.clock.now();
        let mut guard = self.lock();
        self.transition_locked(&mut guard, id, from, to, now).is_some()
    }

    /// Move a non-active stage into `Pending`, remembering why.
    pub fn try_mark_pending(&self, id: &str, from: StageState, reason: TriggerReason) -> bool {
        let now = self.clock.now();
        let mut guard = self.lock();
        if self
            .transition_locked(&mut guard, id, from, StageState::Pending, now)
            .is_none()
        {
            return false;
        }
        if let Some(stage) = guard.get_mut(id) {
            stage.pending_reason = Some(reason);
        }
        true
    }

    /// `Pending -> Running`, returning the reason the stage was pending.
    ///
    /// Taking the reason here is what consumes a one-shot manual request: a
    /// single request can start at most one execution.
    pub fn try_begin_run(&self, id: &str) -> Option<TriggerReason> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let previous =
            self.transition_locked(&mut guard, id, StageState::Pending, StageState::Running, now)?;
        Some(previous.pending_reason.unwrap_or(TriggerReason::Manual))
    }

    fn transition_locked(
        &self,
        stages: &mut HashMap<StageId, StageSnapshot>,
        id: &str,
        from: StageState,
        to: StageState,
        now: DateTime<Utc>,
    ) -> Option<StageSnapshot> {
        if !from.can_transition_to(to) {
            warn!(stage = %id, %from, %to, "rejected illegal state transition");
            return None;
        }

        if to == StageState::Running {
            let deps = self.deps.get(id).map(Vec::as_slice).unwrap_or(&[]);
            let blocked = deps
                .iter()
                .find(|dep| stages.get(dep.as_str()).map(|s| s.state) != Some(StageState::Completed));
            if let Some(dep) = blocked {
                debug!(stage = %id, dep = %dep, "dependency not completed; refusing to start");
                return None;
            }
        }

        let stage = stages.get_mut(id)?;
        if stage.state != from {
            return None;
        }

        let previous = stage.clone();
        stage.state = to;

        match to {
            StageState::Running => {
                stage.last_run_started_at = Some(now);
                stage.pending_reason = None;
            }
            StageState::Completed => {
                stage.last_run_finished_at = Some(now);
                stage.last_completed_at = Some(now);
                stage.last_error = None;
                stage.consecutive_failures = 0;
            }
            StageState::Failed => {
                stage.last_run_finished_at = Some(now);
                stage.consecutive_failures = stage.consecutive_failures.saturating_add(1);
            }
            StageState::Idle => {
                stage.pending_reason = None;
            }
            StageState::Pending => {}
        }

        debug!(stage = %id, %from, %to, "stage transitioned");
        Some(previous)
    }

    /// Record the error message for a stage's latest run.
    pub fn set_error(&self, id: &str, err: impl Into<String>) {
        if let Some(stage) = self.lock().get_mut(id) {
            stage.last_error = Some(err.into());
        }
    }

    /// Remember the artifact fingerprints a dispatch consumed.
    pub fn record_artifact_fingerprints(&self, id: &str, fingerprints: BTreeMap<PathBuf, String>) {
        if fingerprints.is_empty() {
            return;
        }
        if let Some(stage) = self.lock().get_mut(id) {
            stage.artifact_fingerprints.extend(fingerprints);
        }
    }

    /// Handle a manual trigger request.
    ///
    /// A stage that is already `Pending` or `Running` is left untouched and
    /// the request is not accepted. Otherwise the stage moves to `Pending`
    /// with a manual reason. Returns `None` for unknown stages.
    pub fn request_manual(&self, id: &str) -> Option<TriggerAck> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let current = guard.get(id)?.state;

        if current.is_active() {
            return Some(TriggerAck {
                accepted: false,
                current_state: current,
            });
        }

        self.transition_locked(&mut guard, id, current, StageState::Pending, now)?;
        if let Some(stage) = guard.get_mut(id) {
            stage.pending_reason = Some(TriggerReason::Manual);
        }

        Some(TriggerAck {
            accepted: true,
            current_state: StageState::Pending,
        })
    }

    /// Reset every stage that is not `Running` to `Idle` and clear its error.
    ///
    /// Returns the ids of the stages that were reset, sorted.
    pub fn reset_all(&self) -> Vec<StageId> {
        let mut guard = self.lock();
        let mut reset = Vec::new();

        for (id, stage) in guard.iter_mut() {
            if stage.state == StageState::Running {
                continue;
            }
            stage.state = StageState::Idle;
            stage.last_error = None;
            stage.pending_reason = None;
            stage.consecutive_failures = 0;
            reset.push(id.clone());
        }

        reset.sort();
        info!(count = reset.len(), "reset non-running stages to Idle");
        reset
    }

    /// Load previously persisted state.
    ///
    /// Unknown stage ids are ignored. Stages persisted mid-run cannot still be
    /// running in this process, so they come back as `Failed`.
    pub fn restore(&self, persisted: BTreeMap<StageId, StageSnapshot>) {
        let mut guard = self.lock();
        for (id, mut snapshot) in persisted {
            let Some(slot) = guard.get_mut(&id) else {
                warn!(stage = %id, "persisted state for unknown stage; ignoring");
                continue;
            };
            if snapshot.state == StageState::Running {
                snapshot.state = StageState::Failed;
                snapshot.last_error = Some("interrupted: process restarted".to_string());
                snapshot.last_run_finished_at = snapshot.last_run_started_at;
                snapshot.consecutive_failures = snapshot.consecutive_failures.saturating_add(1);
            }
            *slot = snapshot;
        }
    }
}
