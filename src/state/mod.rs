// src/state/mod.rs

//! Mutable orchestrator state.
//!
//! - [`store`] owns per-stage state and is the only place it changes.
//! - [`history`] keeps a bounded log of finished executions.
//! - [`persist`] snapshots both to disk between process runs.

pub mod history;
pub mod persist;
pub mod store;

pub use history::{DEFAULT_HISTORY_CAPACITY, ExecutionRecord, HistoryLog, RunOutcome};
pub use persist::{PersistedState, StatePersister};
pub use store::{StageSnapshot, StageState, StageStateStore, TriggerAck};
