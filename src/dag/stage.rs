// src/dag/stage.rs

//! Static stage definitions.

use std::time::Duration;

use crate::trigger::TriggerCondition;

/// Canonical stage identifier type used throughout the crate.
pub type StageId = String;

/// Default minimum wait before a failed stage is retried.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Default hard limit on a single stage execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Immutable description of one pipeline stage.
///
/// Built once from config (or programmatically) and owned by the
/// [`DependencyGraph`](crate::dag::DependencyGraph) for the lifetime of the
/// process. Mutable per-stage state lives in the state store instead.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDef {
    pub id: StageId,
    /// Stages that must be `Completed` before this one may start.
    pub depends_on: Vec<StageId>,
    /// OR-combined trigger conditions.
    pub triggers: Vec<TriggerCondition>,
    pub cooldown: Duration,
    pub timeout: Duration,
    /// Cap on automatic retries after failure; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Shell command for the bundled subprocess runner.
    pub cmd: Option<String>,
}

impl StageDef {
    pub fn new(id: impl Into<StageId>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            triggers: Vec::new(),
            cooldown: DEFAULT_COOLDOWN,
            timeout: DEFAULT_TIMEOUT,
            max_retries: None,
            cmd: None,
        }
    }

    pub fn depends_on(mut self, dep: impl Into<StageId>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    pub fn trigger(mut self, condition: TriggerCondition) -> Self {
        self.triggers.push(condition);
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    /// Artifact paths this stage's triggers probe.
    pub fn artifact_paths(&self) -> impl Iterator<Item = &std::path::Path> {
        self.triggers.iter().filter_map(|t| match t {
            TriggerCondition::ArtifactExists(p) => Some(p.as_path()),
            _ => None,
        })
    }

    /// Whether another automatic retry is allowed after `failures`
    /// consecutive failures.
    pub fn retry_allowed(&self, failures: u32) -> bool {
        match self.max_retries {
            Some(max) => failures <= max,
            None => true,
        }
    }
}
