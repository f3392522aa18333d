// src/config/model.rs

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::DependencyGraph;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// tick_interval = "10s"
/// history_capacity = 100
/// listen = "127.0.0.1:8080"
/// state_file = ".stagedag/state.json"
///
/// [default]
/// cooldown = "60s"
/// timeout = "10m"
///
/// [stage.ingest]
/// cmd = "./ingest.sh"
/// triggers = [{ kind = "time_elapsed", every = "1h" }]
///
/// [stage.transform]
/// cmd = "./transform.sh"
/// depends_on = ["ingest"]
/// triggers = [{ kind = "upstream", stage = "ingest" }]
/// ```
///
/// This is the raw, unvalidated form. Convert it with
/// `ConfigFile::try_from` before use.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// All stages from `[stage.<id>]`, keyed by stage id.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,
}

/// `[config]` section: process-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Interval between monitor loop ticks, e.g. `"10s"`.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    /// Maximum number of execution records kept in memory.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Address the control API binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Where stage state is persisted between runs. Relative paths resolve
    /// against the config file's directory. Unset disables persistence.
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Watch artifact paths and tick as soon as they change.
    #[serde(default = "default_watch_artifacts")]
    pub watch_artifacts: bool,
}

fn default_tick_interval() -> String {
    "10s".to_string()
}

fn default_history_capacity() -> usize {
    crate::state::DEFAULT_HISTORY_CAPACITY
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_watch_artifacts() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            history_capacity: default_history_capacity(),
            listen: default_listen(),
            state_file: None,
            watch_artifacts: default_watch_artifacts(),
        }
    }
}

/// `[default]` section: per-stage fallbacks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultSection {
    #[serde(default)]
    pub cooldown: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// `[stage.<id>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Shell command run by the subprocess runner.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Stages that must be `Completed` before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// OR-combined trigger conditions.
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,

    #[serde(default)]
    pub cooldown: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// One entry in a stage's `triggers` list, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    Manual,
    TimeElapsed { every: String },
    Artifact { path: PathBuf },
    Upstream { stage: String },
}

/// Validated process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub tick_interval: Duration,
    pub history_capacity: usize,
    pub listen: SocketAddr,
    pub state_file: Option<PathBuf>,
    pub watch_artifacts: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_interval: crate::engine::DEFAULT_TICK_INTERVAL,
            history_capacity: default_history_capacity(),
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            state_file: None,
            watch_artifacts: default_watch_artifacts(),
        }
    }
}

/// Validated configuration: settings plus a checked dependency graph.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub settings: Settings,
    pub graph: DependencyGraph,
}

impl ConfigFile {
    /// Assemble without further checks. Used by the `TryFrom<RawConfigFile>`
    /// conversion and by tests that build a graph directly.
    pub fn new_unchecked(settings: Settings, graph: DependencyGraph) -> Self {
        Self { settings, graph }
    }
}
