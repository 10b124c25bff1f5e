//! Error types for the sync daemon.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type.
///
/// Source and remote failures are per-record: they are logged and counted
/// inside a cycle and never escape it, so they have no variant here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sync cycle failed: {0}")]
    Cycle(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid path for {key}: {}", path.display())]
    InvalidPath { key: String, path: PathBuf },
}

/// Errors reading the on-disk session logs and job list.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source {} unavailable: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record in {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// Remote store call failures.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request to {table} failed: {reason}")]
    Request { table: String, reason: String },

    #[error("{table} returned {status}: {body}")]
    Status {
        table: String,
        status: u16,
        body: String,
    },

    #[error("Call to {table} for {key} timed out after {timeout:?}")]
    Timeout {
        table: String,
        key: String,
        timeout: Duration,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
