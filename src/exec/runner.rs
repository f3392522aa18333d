// src/exec/runner.rs

//! Pluggable stage runner abstraction.
//!
//! The executor talks to a `StageRunner` instead of knowing how a stage is
//! implemented. Production code uses
//! [`CommandRunner`](crate::exec::command::CommandRunner); embedders and tests
//! can wrap a closure in [`FnRunner`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::time::Instant;

use crate::dag::StageId;
use crate::trigger::TriggerReason;

/// Everything a runner is told about one execution.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub stage_id: StageId,
    /// The execution is cancelled once this passes. Runners should finish
    /// before it; the executor drops the future at the deadline regardless.
    pub deadline: Instant,
    pub reason: TriggerReason,
}

impl StageContext {
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// What a runner reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed(String),
}

impl StageOutcome {
    pub fn failed(msg: impl Into<String>) -> Self {
        StageOutcome::Failed(msg.into())
    }
}

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = StageOutcome> + Send + 'a>>;

/// Trait abstracting how one stage is executed.
pub trait StageRunner: Send + Sync {
    /// Run the stage described by `ctx` to completion.
    ///
    /// Implementations must not panic on ordinary failures; report them as
    /// [`StageOutcome::Failed`]. Dropping the returned future must stop the
    /// underlying work.
    fn run(&self, ctx: StageContext) -> RunFuture<'_>;
}

/// Adapter turning an async closure into a [`StageRunner`].
pub struct FnRunner<F> {
    f: F,
}

impl<F, Fut> FnRunner<F>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutcome> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> Arc<dyn StageRunner>
    where
        F: 'static,
    {
        Arc::new(Self::new(f))
    }
}

impl<F> fmt::Debug for FnRunner<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRunner").finish_non_exhaustive()
    }
}

impl<F, Fut> StageRunner for FnRunner<F>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutcome> + Send + 'static,
{
    fn run(&self, ctx: StageContext) -> RunFuture<'_> {
        Box::pin((self.f)(ctx))
    }
}
