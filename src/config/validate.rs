// src/config/validate.rs

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, ConfigSection, DefaultSection, RawConfigFile, Settings, StageConfig, TriggerSpec,
};
use crate::dag::{DEFAULT_COOLDOWN, DEFAULT_TIMEOUT, DependencyGraph, StageDef};
use crate::errors::{Result, StagedagError};
use crate::trigger::TriggerCondition;

/// Upper bound for a stage timeout.
pub const MAX_STAGE_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StagedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_stages(&raw)?;
        let settings = validate_settings(&raw.config)?;

        let stages = raw
            .stage
            .iter()
            .map(|(id, stage)| build_stage(id, stage, &raw.default))
            .collect::<Result<Vec<_>>>()?;

        // Reference and cycle checks live in the graph itself.
        let graph = DependencyGraph::load(stages)?;

        Ok(ConfigFile::new_unchecked(settings, graph))
    }
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(StagedagError::ConfigError(
            "config must contain at least one [stage.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_settings(section: &ConfigSection) -> Result<Settings> {
    let tick_interval = duration_field("[config].tick_interval", &section.tick_interval)?;
    if tick_interval.is_zero() {
        return Err(StagedagError::ConfigError(
            "[config].tick_interval must be greater than zero".to_string(),
        ));
    }

    if section.history_capacity == 0 {
        return Err(StagedagError::ConfigError(
            "[config].history_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    let listen: SocketAddr = section.listen.parse().map_err(|e| {
        StagedagError::ConfigError(format!(
            "[config].listen '{}' is not a socket address: {e}",
            section.listen
        ))
    })?;

    Ok(Settings {
        tick_interval,
        history_capacity: section.history_capacity,
        listen,
        state_file: section.state_file.clone(),
        watch_artifacts: section.watch_artifacts,
    })
}

fn build_stage(id: &str, cfg: &StageConfig, defaults: &DefaultSection) -> Result<StageDef> {
    let field = |name: &str| format!("[stage.{id}].{name}");

    let cooldown = match cfg.cooldown.as_deref().or(defaults.cooldown.as_deref()) {
        Some(s) => duration_field(&field("cooldown"), s)?,
        None => DEFAULT_COOLDOWN,
    };

    let timeout = match cfg.timeout.as_deref().or(defaults.timeout.as_deref()) {
        Some(s) => duration_field(&field("timeout"), s)?,
        None => DEFAULT_TIMEOUT,
    };
    if timeout.is_zero() {
        return Err(StagedagError::ConfigError(format!(
            "{} must be greater than zero",
            field("timeout")
        )));
    }
    if timeout > MAX_STAGE_TIMEOUT {
        return Err(StagedagError::ConfigError(format!(
            "{} must be at most {}h",
            field("timeout"),
            MAX_STAGE_TIMEOUT.as_secs() / 3600
        )));
    }

    let triggers = cfg
        .triggers
        .iter()
        .map(|spec| build_trigger(id, spec))
        .collect::<Result<Vec<_>>>()?;

    Ok(StageDef {
        id: id.to_string(),
        depends_on: cfg.depends_on.clone(),
        triggers,
        cooldown,
        timeout,
        max_retries: cfg.max_retries.or(defaults.max_retries),
        cmd: cfg.cmd.clone(),
    })
}

fn build_trigger(id: &str, spec: &TriggerSpec) -> Result<TriggerCondition> {
    Ok(match spec {
        TriggerSpec::Manual => TriggerCondition::Manual,
        TriggerSpec::TimeElapsed { every } => {
            let every = duration_field(&format!("[stage.{id}] time_elapsed trigger"), every)?;
            TriggerCondition::TimeElapsedSince(every)
        }
        TriggerSpec::Artifact { path } => {
            if path.as_os_str().is_empty() {
                return Err(StagedagError::ConfigError(format!(
                    "[stage.{id}] artifact trigger needs a non-empty `path`"
                )));
            }
            TriggerCondition::ArtifactExists(path.clone())
        }
        TriggerSpec::Upstream { stage } => TriggerCondition::UpstreamJustCompleted(stage.clone()),
    })
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| StagedagError::ConfigError(format!("{field}: invalid duration: {e}")))
}
