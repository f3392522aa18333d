// src/trigger/mod.rs

//! Trigger conditions and their evaluation.
//!
//! - [`condition`] defines the closed set of conditions and trigger reasons.
//! - [`artifact`] fingerprints files and directories through the
//!   [`FileSystem`](crate::fs::FileSystem) abstraction.
//! - [`evaluator`] decides, per stage and tick, whether any condition holds.

pub mod artifact;
pub mod condition;
pub mod evaluator;

pub use artifact::{ArtifactProbe, ResourceUnavailable};
pub use condition::{TriggerCondition, TriggerReason};
pub use evaluator::{Firing, TriggerEvaluator};
