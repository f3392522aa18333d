// src/exec/executor.rs

//! Deadline-enforcing wrapper around a [`StageRunner`].

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dag::StageDef;
use crate::exec::runner::{StageContext, StageOutcome, StageRunner};
use crate::trigger::TriggerReason;

/// Why an execution did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The runner reported failure, or panicked.
    #[error("{0}")]
    Transient(String),
    /// The runner did not finish within the stage timeout.
    #[error("timeout: stage exceeded its {0:?} deadline")]
    Timeout(Duration),
}

impl ExecutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout(_))
    }
}

/// Invokes stage runners in isolation.
///
/// Each run happens on its own Tokio task so that a panic inside the runner
/// is caught as a failure, and so it can be aborted at the deadline.
#[derive(Clone)]
pub struct StageExecutor {
    runner: Arc<dyn StageRunner>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor").finish_non_exhaustive()
    }
}

impl StageExecutor {
    pub fn new(runner: Arc<dyn StageRunner>) -> Self {
        Self { runner }
    }

    /// Run `stage` once, enforcing its timeout.
    ///
    /// Never panics and never propagates the runner's failure as anything
    /// other than an [`ExecutionError`].
    pub async fn run(&self, stage: &StageDef, reason: TriggerReason) -> Result<(), ExecutionError> {
        let deadline = deadline_after(stage.timeout);
        let ctx = StageContext {
            stage_id: stage.id.clone(),
            deadline,
            reason,
        };

        let runner = Arc::clone(&self.runner);
        let mut handle = tokio::spawn(async move { runner.run(ctx).await });

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(StageOutcome::Completed)) => {
                debug!(stage = %stage.id, "runner reported completion");
                Ok(())
            }
            Ok(Ok(StageOutcome::Failed(msg))) => Err(ExecutionError::Transient(msg)),
            Ok(Err(join_err)) => Err(ExecutionError::Transient(describe_join_error(join_err))),
            Err(_elapsed) => {
                // Dropping the runner future is the cancellation signal.
                handle.abort();
                warn!(stage = %stage.id, timeout = ?stage.timeout, "stage timed out; cancelled");
                Err(ExecutionError::Timeout(stage.timeout))
            }
        }
    }
}

/// Longest wait the executor will arm a timer for.
const MAX_DEADLINE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `now + timeout`, clamped so that huge timeouts cannot overflow `Instant`.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_DEADLINE)).unwrap_or(now)
}

pub(crate) fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("stage panicked: {}", panic_message(err.into_panic()))
    } else {
        "stage task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
