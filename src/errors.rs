// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::interrupt::RunInterrupted;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation was already started; a process runner runs at most once")]
    AlreadyStarted,

    #[error("Cannot change {0} on the shared default runner")]
    ImmutableRunner(&'static str),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Run abandoned after output draining did not finish within the cancel grace period")]
    ForcedInterrupt,

    #[error(transparent)]
    Interrupted(#[from] RunInterrupted),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ExecError>;
