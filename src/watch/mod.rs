// src/watch/mod.rs

//! Artifact watching.
//!
//! Turns filesystem changes under artifact trigger paths into scheduler
//! wake-ups. Whether a stage actually runs is still decided by its trigger
//! evaluation on the next tick; the watcher only shortens the wait.

pub mod watcher;

pub use watcher::{WatcherHandle, affected_artifact, artifact_targets, spawn_watcher};
