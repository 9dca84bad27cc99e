#![allow(dead_code)]

use std::path::Path;

use harness_exec::config::{ExecConfig, RawConfigFile};
use harness_exec::types::EnvPriority;

/// Builder for `ExecConfig` to simplify test setup.
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.timing.poll_interval_ms = ms;
        self
    }

    pub fn cancel_grace_ms(mut self, ms: u64) -> Self {
        self.config.timing.cancel_grace_ms = ms;
        self
    }

    pub fn pump_join_ms(mut self, ms: u64) -> Self {
        self.config.timing.pump_join_ms = ms;
        self
    }

    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timing.default_timeout_ms = ms;
        self
    }

    pub fn retry(mut self, attempts: u32, interval_ms: u64) -> Self {
        self.config.retry.attempts = attempts;
        self.config.retry.interval_ms = interval_ms;
        self
    }

    pub fn set_env(mut self, key: &str, value: &str) -> Self {
        self.config.env.set.insert(key.to_string(), value.to_string());
        self
    }

    pub fn unset_env(mut self, key: &str) -> Self {
        self.config.env.unset.push(key.to_string());
        self
    }

    pub fn env_priority(mut self, priority: EnvPriority) -> Self {
        self.config.env.priority = priority;
        self
    }

    pub fn working_dir(mut self, dir: &Path) -> Self {
        self.config.env.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ExecConfig {
        ExecConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
