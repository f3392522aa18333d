// src/exec/mod.rs

//! Stage execution layer.
//!
//! - [`runner`] defines the `StageRunner` adapter trait and a closure-based
//!   implementation.
//! - [`command`] runs each stage's shell command with
//!   `tokio::process::Command`.
//! - [`executor`] wraps a runner with timeout enforcement and failure
//!   containment.

pub mod command;
pub mod executor;
pub mod runner;

pub use command::CommandRunner;
pub use executor::{ExecutionError, StageExecutor};
pub use runner::{FnRunner, RunFuture, StageContext, StageOutcome, StageRunner};
