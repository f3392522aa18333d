// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] mirrors the TOML layout and holds the validated result.
//! - [`loader`] reads files and parses TOML.
//! - [`validate`] converts the raw model into stage definitions and a
//!   checked [`DependencyGraph`](crate::dag::DependencyGraph).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{config_root_dir, default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    ConfigFile, ConfigSection, DefaultSection, RawConfigFile, Settings, StageConfig, TriggerSpec,
};
