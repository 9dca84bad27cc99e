// src/config/validate.rs

use crate::config::model::{ExecConfig, RawConfigFile};
use crate::errors::{ExecError, Result};

impl TryFrom<RawConfigFile> for ExecConfig {
    type Error = ExecError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ExecConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_timing(cfg)?;
    validate_retry(cfg)?;
    validate_env(cfg)?;
    Ok(())
}

fn validate_timing(cfg: &RawConfigFile) -> Result<()> {
    if cfg.timing.poll_interval_ms == 0 {
        return Err(ExecError::ConfigError(
            "[timing].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.timing.cancel_grace_ms == 0 {
        return Err(ExecError::ConfigError(
            "[timing].cancel_grace_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_retry(cfg: &RawConfigFile) -> Result<()> {
    if cfg.retry.attempts == 0 {
        return Err(ExecError::ConfigError(
            "[retry].attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_env(cfg: &RawConfigFile) -> Result<()> {
    // A key may appear in both `set` and `unset`; `priority` decides.
    let keys = cfg
        .env
        .set
        .keys()
        .map(String::as_str)
        .chain(cfg.env.unset.iter().map(String::as_str));
    for key in keys {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(ExecError::ConfigError(format!(
                "[env] has invalid variable name '{}'",
                key
            )));
        }
    }

    if let Some(dir) = &cfg.env.working_dir {
        if !dir.is_dir() {
            return Err(ExecError::ConfigError(format!(
                "[env].working_dir '{}' is not a directory",
                dir.display()
            )));
        }
    }
    Ok(())
}
