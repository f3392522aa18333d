// src/dag/mod.rs

//! Stage definitions and the dependency graph.
//!
//! - [`stage`] holds the static per-stage definition.
//! - [`graph`] validates the DAG once at load time and answers ordering and
//!   readiness queries.

pub mod graph;
pub mod stage;

pub use graph::DependencyGraph;
pub use stage::{DEFAULT_COOLDOWN, DEFAULT_TIMEOUT, StageDef, StageId};
