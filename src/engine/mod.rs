// src/engine/mod.rs

//! Orchestration engine for stagedag.
//!
//! This module ties together:
//! - the tick-based [`Scheduler`] that decides what runs next and dispatches
//!   executions,
//! - the [`Runtime`] monitor loop that ticks on a fixed interval and on wake
//!   events (stage finished, manual trigger, artifact change, shutdown),
//! - [`Orchestrator`], which assembles both from a validated config.

use std::time::Duration;

use crate::dag::StageId;
use crate::state::RunOutcome;

/// Events that wake the monitor loop between interval ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A stage execution finished; its dependents may now be eligible.
    StageFinished { stage: StageId, outcome: RunOutcome },
    /// A manual trigger was accepted by the control API.
    TriggerRequested { stage: StageId },
    /// The artifact watcher saw a change under this path.
    ArtifactChanged { path: std::path::PathBuf },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Default interval between scheduler ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// How long shutdown waits for in-flight executions.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Options for the monitor loop.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    pub tick_interval: Duration,
    /// Exit once a tick dispatches nothing and no stage is running (used for
    /// `--once`).
    pub exit_when_idle: bool,
    pub shutdown_grace: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            exit_when_idle: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

pub mod orchestrator;
pub mod runtime;
pub mod scheduler;

pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use runtime::Runtime;
pub use scheduler::{Dispatch, Scheduler};
