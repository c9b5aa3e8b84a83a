//! Error types for the management console

use thiserror::Error;

/// Main error type for the management console
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Remote command error: {0}")]
    RemoteError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Directory service error: {0}")]
    DirectoryError(String),

    #[error("Log sink error: {0}")]
    LogSinkError(String),

    #[error("Job error: {0}")]
    JobError(String),

    #[error("Topology error: {0}")]
    TopologyError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ConsoleError {
    fn from(err: anyhow::Error) -> Self {
        ConsoleError::Internal(err.to_string())
    }
}
