// src/trigger/evaluator.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::elapsed_between;
use crate::dag::{StageDef, StageId};
use crate::state::{StageSnapshot, StageState};
use crate::trigger::artifact::ArtifactProbe;
use crate::trigger::condition::{TriggerCondition, TriggerReason};

/// Outcome of a positive trigger evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub reason: TriggerReason,
    /// Current fingerprints of every artifact the stage probes. Recorded on
    /// dispatch so the same input does not fire the stage twice.
    pub fingerprints: BTreeMap<PathBuf, String>,
}

/// Decides whether a stage's trigger conditions currently hold.
///
/// Evaluation is read-only: it looks at a store snapshot, the current time
/// and artifact fingerprints, and never mutates anything. Consuming a manual
/// request happens when the store moves the stage into `Running`.
#[derive(Debug, Clone)]
pub struct TriggerEvaluator {
    probe: ArtifactProbe,
}

impl TriggerEvaluator {
    pub fn new(probe: ArtifactProbe) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> &ArtifactProbe {
        &self.probe
    }

    /// Evaluate `stage` against `stages` (a snapshot of the whole store).
    ///
    /// Returns the reason for the first condition that holds, in order:
    /// an outstanding pending reason (e.g. manual request), an automatic
    /// retry of a failed stage, then the configured conditions.
    ///
    /// Cooldown and dependency readiness are the scheduler's concern and are
    /// not checked here.
    pub fn should_run(
        &self,
        stage: &StageDef,
        stages: &BTreeMap<StageId, StageSnapshot>,
        now: DateTime<Utc>,
    ) -> Option<Firing> {
        let own = stages.get(&stage.id)?;

        match own.state {
            StageState::Running => return None,
            StageState::Pending => {
                let reason = own.pending_reason.unwrap_or(TriggerReason::Manual);
                return Some(self.fire(stage, reason));
            }
            StageState::Failed => {
                if stage.retry_allowed(own.consecutive_failures) {
                    return Some(self.fire(stage, TriggerReason::Retry));
                }
                debug!(
                    stage = %stage.id,
                    failures = own.consecutive_failures,
                    "retry budget exhausted; waiting for manual trigger or restart"
                );
                return None;
            }
            StageState::Idle | StageState::Completed => {}
        }

        if stage.triggers.is_empty() {
            return None;
        }

        let observed = self.observe_artifacts(stage);

        stage
            .triggers
            .iter()
            .find(|cond| condition_holds(cond, own, stages, &observed, now))
            .map(|cond| Firing {
                reason: cond.reason(),
                fingerprints: observed.clone(),
            })
    }

    fn fire(&self, stage: &StageDef, reason: TriggerReason) -> Firing {
        Firing {
            reason,
            fingerprints: self.observe_artifacts(stage),
        }
    }

    /// Fingerprints of the artifacts that are present and readable.
    fn observe_artifacts(&self, stage: &StageDef) -> BTreeMap<PathBuf, String> {
        let mut observed = BTreeMap::new();
        for path in stage.artifact_paths() {
            match self.probe.fingerprint(path) {
                Ok(Some(fp)) => {
                    observed.insert(path.to_path_buf(), fp);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(stage = %stage.id, error = %err, "artifact probe failed; treating as not present");
                }
            }
        }
        observed
    }
}

fn condition_holds(
    cond: &TriggerCondition,
    own: &StageSnapshot,
    stages: &BTreeMap<StageId, StageSnapshot>,
    observed: &BTreeMap<PathBuf, String>,
    now: DateTime<Utc>,
) -> bool {
    match cond {
        // Manual requests surface as a pending reason; the condition on its
        // own never fires.
        TriggerCondition::Manual => false,
        TriggerCondition::TimeElapsedSince(every) => match own.last_run_started_at {
            None => true,
            Some(started) => elapsed_between(started, now) >= *every,
        },
        TriggerCondition::ArtifactExists(path) => match observed.get(path) {
            Some(current) => own.artifact_fingerprints.get(path) != Some(current),
            None => false,
        },
        TriggerCondition::UpstreamJustCompleted(upstream) => {
            let Some(completed_at) = stages.get(upstream).and_then(|s| s.last_completed_at) else {
                return false;
            };
            match own.last_run_started_at {
                None => true,
                Some(started) => completed_at > started,
            }
        }
    }
}
