// src/engine/scheduler.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::clock::{Clock, elapsed_between};
use crate::dag::{DependencyGraph, StageDef, StageId};
use crate::engine::SchedulerEvent;
use crate::exec::executor::describe_join_error;
use crate::exec::{ExecutionError, StageExecutor};
use crate::state::{
    ExecutionRecord, HistoryLog, RunOutcome, StatePersister, StageState, StageStateStore,
};
use crate::trigger::{TriggerEvaluator, TriggerReason};

/// A stage started by a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub stage: StageId,
    pub reason: TriggerReason,
}

/// Decides what runs next and dispatches executions.
///
/// The scheduler holds:
/// - the immutable dependency graph
/// - shared handles to the state store and history log
/// - the trigger evaluator and executor
/// - handles of in-flight executions (at most one per stage)
///
/// [`tick`](Self::tick) never awaits an execution; each dispatched stage runs
/// on its own Tokio task and reports back through
/// [`SchedulerEvent::StageFinished`].
pub struct Scheduler {
    graph: Arc<DependencyGraph>,
    store: Arc<StageStateStore>,
    history: Arc<HistoryLog>,
    evaluator: TriggerEvaluator,
    executor: StageExecutor,
    clock: Arc<dyn Clock>,
    events: mpsc::Sender<SchedulerEvent>,
    persister: Option<Arc<StatePersister>>,
    active: Mutex<HashMap<StageId, JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("stages", &self.graph.topological_order())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<DependencyGraph>,
        store: Arc<StageStateStore>,
        history: Arc<HistoryLog>,
        evaluator: TriggerEvaluator,
        executor: StageExecutor,
        clock: Arc<dyn Clock>,
        events: mpsc::Sender<SchedulerEvent>,
        persister: Option<Arc<StatePersister>>,
    ) -> Self {
        Self {
            graph,
            store,
            history,
            evaluator,
            executor,
            clock,
            events,
            persister,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn store(&self) -> &Arc<StageStateStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<HistoryLog> {
        &self.history
    }

    fn active(&self) -> MutexGuard<'_, HashMap<StageId, JoinHandle<()>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of executions whose tasks have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.active().values().filter(|h| !h.is_finished()).count()
    }

    /// One evaluation pass over every stage in topological order.
    ///
    /// Skip/dispatch decisions are made against one store snapshot taken at
    /// the start of the pass. Races with concurrent callers are settled by
    /// the store's compare-and-swap transitions, not by holding a lock over
    /// the whole pass.
    pub fn tick(self: &Arc<Self>) -> Vec<Dispatch> {
        let now = self.clock.now();
        let snapshot = self.store.snapshot();
        let mut dispatched = Vec::new();

        for stage in self.graph.stages() {
            let Some(current) = snapshot.get(&stage.id) else {
                warn!(stage = %stage.id, "stage missing from state store");
                continue;
            };

            match current.state {
                StageState::Running => continue,
                StageState::Failed => {
                    if let Some(finished) = current.last_run_finished_at {
                        if elapsed_between(finished, now) < stage.cooldown {
                            trace!(stage = %stage.id, "failed stage still cooling down");
                            continue;
                        }
                    }
                }
                _ => {}
            }

            if !self.graph.is_ready_in(&stage.id, &snapshot) {
                trace!(stage = %stage.id, "dependencies not completed");
                continue;
            }

            let Some(firing) = self.evaluator.should_run(stage, &snapshot, now) else {
                continue;
            };

            if current.state != StageState::Pending
                && !self
                    .store
                    .try_mark_pending(&stage.id, current.state, firing.reason)
            {
                debug!(stage = %stage.id, "lost race marking stage Pending; skipping");
                continue;
            }

            let Some(reason) = self.store.try_begin_run(&stage.id) else {
                debug!(stage = %stage.id, "could not start stage this tick; left Pending");
                continue;
            };

            self.store
                .record_artifact_fingerprints(&stage.id, firing.fingerprints);

            info!(stage = %stage.id, %reason, "dispatching stage");
            self.spawn_execution(stage.clone(), reason);
            dispatched.push(Dispatch {
                stage: stage.id.clone(),
                reason,
            });
        }

        dispatched
    }

    fn spawn_execution(self: &Arc<Self>, stage: StageDef, reason: TriggerReason) {
        let this = Arc::clone(self);
        let id = stage.id.clone();

        let handle = tokio::spawn(async move {
            let started_at = this
                .store
                .get(&stage.id)
                .and_then(|s| s.last_run_started_at)
                .unwrap_or_else(|| this.clock.now());

            // The executor runs on its own task so that anything going wrong
            // inside it still ends in `finish` and the stage leaves Running.
            let executor = this.executor.clone();
            let run_stage = stage.clone();
            let run = tokio::spawn(async move { executor.run(&run_stage, reason).await });
            let result = match run.await {
                Ok(result) => result,
                Err(join_err) => {
                    error!(stage = %stage.id, error = %join_err, "executor task failed");
                    Err(ExecutionError::Transient(describe_join_error(join_err)))
                }
            };
            let outcome = this.finish(&stage, reason, started_at, result);
            this.persist_in_background().await;
            this.notify_finished(&stage.id, outcome);
        });

        let mut active = self.active();
        active.retain(|_, h| !h.is_finished());
        active.insert(id, handle);
    }

    /// Move the stage out of Running and record the execution.
    fn finish(
        &self,
        stage: &StageDef,
        reason: TriggerReason,
        started_at: DateTime<Utc>,
        result: Result<(), ExecutionError>,
    ) -> RunOutcome {
        let (outcome, error) = match result {
            Ok(()) => {
                if !self
                    .store
                    .try_transition(&stage.id, StageState::Running, StageState::Completed)
                {
                    error!(stage = %stage.id, "stage was not Running at completion");
                }
                info!(stage = %stage.id, "stage completed");
                (RunOutcome::Completed, None)
            }
            Err(err) => {
                let msg = err.to_string();
                self.store.set_error(&stage.id, msg.clone());
                if !self
                    .store
                    .try_transition(&stage.id, StageState::Running, StageState::Failed)
                {
                    error!(stage = %stage.id, "stage was not Running at failure");
                }
                warn!(
                    stage = %stage.id,
                    timeout = err.is_timeout(),
                    error = %msg,
                    "stage failed"
                );
                (RunOutcome::Failed, Some(msg))
            }
        };

        let finished_at = self
            .store
            .get(&stage.id)
            .and_then(|s| s.last_run_finished_at)
            .unwrap_or_else(|| self.clock.now());

        self.history.append(ExecutionRecord {
            stage_id: stage.id.clone(),
            started_at,
            finished_at,
            outcome,
            trigger_reason: reason,
            error,
        });
        outcome
    }

    /// Wake the monitor loop after `stage` finished.
    fn notify_finished(&self, stage: &str, outcome: RunOutcome) {
        // Wake-ups are an optimisation; the interval tick covers a full or
        // closed channel.
        let _ = self.events.try_send(SchedulerEvent::StageFinished {
            stage: stage.to_string(),
            outcome,
        });
    }

    /// [`tick`](Self::tick) on the blocking pool. Artifact triggers hash
    /// files while they are evaluated.
    pub async fn tick_in_background(self: &Arc<Self>) -> Vec<Dispatch> {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || this.tick()).await {
            Ok(dispatched) => dispatched,
            Err(err) => {
                error!(error = %err, "scheduler tick task failed");
                Vec::new()
            }
        }
    }

    /// [`persist`](Self::persist) on the blocking pool.
    async fn persist_in_background(self: &Arc<Self>) {
        if self.persister.is_none() {
            return;
        }
        let this = Arc::clone(self);
        if let Err(err) = tokio::task::spawn_blocking(move || this.persist()).await {
            warn!(error = %err, "state persistence task failed");
        }
    }

    /// Write the state snapshot if persistence is configured.
    pub fn persist(&self) {
        if let Some(persister) = &self.persister {
            if let Err(err) = persister.save(&self.store, &self.history, self.clock.now()) {
                warn!(path = ?persister.path(), error = %err, "failed to persist stage state");
            }
        }
    }

    /// Wait until every in-flight execution has finished.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<(StageId, JoinHandle<()>)> = self.active().drain().collect();
            if handles.is_empty() {
                return;
            }
            for (stage, handle) in handles {
                if let Err(err) = handle.await {
                    error!(stage = %stage, error = %err, "execution task ended abnormally");
                }
            }
        }
    }

    /// Stop: wait up to `grace` for in-flight executions, then persist.
    pub async fn shutdown(&self, grace: Duration) {
        let pending = self.in_flight();
        if pending > 0 {
            info!(pending, ?grace, "waiting for in-flight stages before exit");
            if tokio::time::timeout(grace, self.drain()).await.is_err() {
                warn!("in-flight stages did not finish within the shutdown grace period");
            }
        }
        self.persist();
    }
}
