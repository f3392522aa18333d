// src/trigger/condition.rs

//! Trigger condition and trigger reason types.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dag::StageId;

/// One condition under which a stage becomes eligible to run.
///
/// A stage's conditions are OR-combined. Manual requests coming from the
/// control API are honoured for every stage, whether or not `Manual` is
/// listed; listing it only documents that the stage is manual-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerCondition {
    Manual,
    /// Fires when the stage has never started, or its last start is at least
    /// this long ago.
    TimeElapsedSince(Duration),
    /// Fires when the artifact exists and its content fingerprint differs
    /// from the one consumed by the stage's previous dispatch.
    ArtifactExists(PathBuf),
    /// Fires when the named stage completed after this stage last started.
    UpstreamJustCompleted(StageId),
}

impl TriggerCondition {
    /// The reason recorded when this condition fires.
    pub fn reason(&self) -> TriggerReason {
        match self {
            TriggerCondition::Manual => TriggerReason::Manual,
            TriggerCondition::TimeElapsedSince(_) => TriggerReason::Time,
            TriggerCondition::ArtifactExists(_) => TriggerReason::Artifact,
            TriggerCondition::UpstreamJustCompleted(_) => TriggerReason::Upstream,
        }
    }
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerCondition::Manual => write!(f, "manual"),
            TriggerCondition::TimeElapsedSince(d) => write!(f, "every {d:?}"),
            TriggerCondition::ArtifactExists(p) => write!(f, "artifact {}", p.display()),
            TriggerCondition::UpstreamJustCompleted(s) => write!(f, "after {s} completes"),
        }
    }
}

/// Why a stage execution was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerReason {
    /// Requested through the control API.
    Manual,
    /// `TimeElapsedSince` fired.
    Time,
    /// New artifact content was observed.
    Artifact,
    /// An upstream stage completed.
    Upstream,
    /// Automatic retry of a failed stage after its cooldown.
    Retry,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerReason::Manual => "manual",
            TriggerReason::Time => "time",
            TriggerReason::Artifact => "artifact",
            TriggerReason::Upstream => "upstream",
            TriggerReason::Retry => "retry",
        };
        f.write_str(s)
    }
}
