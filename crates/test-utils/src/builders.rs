#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use stagedag::config::{
    ConfigFile, ConfigSection, DefaultSection, RawConfigFile, StageConfig, TriggerSpec,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                default: DefaultSection::default(),
                stage: BTreeMap::new(),
            },
        }
    }

    pub fn with_stage(mut self, id: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(id.to_string(), stage);
        self
    }

    pub fn tick_interval(mut self, interval: &str) -> Self {
        self.config.config.tick_interval = interval.to_string();
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.config.history_capacity = capacity;
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config.state_file = Some(path.into());
        self
    }

    pub fn default_cooldown(mut self, cooldown: &str) -> Self {
        self.config.default.cooldown = Some(cooldown.to_string());
        self
    }

    pub fn default_timeout(mut self, timeout: &str) -> Self {
        self.config.default.timeout = Some(timeout.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new() -> Self {
        Self {
            stage: StageConfig::default(),
        }
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.stage.cmd = Some(cmd.to_string());
        self
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.stage.depends_on.push(dep.to_string());
        self
    }

    pub fn manual(mut self) -> Self {
        self.stage.triggers.push(TriggerSpec::Manual);
        self
    }

    pub fn every(mut self, every: &str) -> Self {
        self.stage.triggers.push(TriggerSpec::TimeElapsed {
            every: every.to_string(),
        });
        self
    }

    pub fn artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.stage
            .triggers
            .push(TriggerSpec::Artifact { path: path.into() });
        self
    }

    pub fn after_upstream(mut self, stage: &str) -> Self {
        self.stage.triggers.push(TriggerSpec::Upstream {
            stage: stage.to_string(),
        });
        self
    }

    /// `depends_on` plus an upstream trigger on the same stage.
    pub fn downstream_of(self, stage: &str) -> Self {
        self.depends_on(stage).after_upstream(stage)
    }

    pub fn cooldown(mut self, cooldown: &str) -> Self {
        self.stage.cooldown = Some(cooldown.to_string());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.stage.timeout = Some(timeout.to_string());
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.stage.max_retries = Some(max);
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}

impl Default for StageConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
