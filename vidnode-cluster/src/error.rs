//! Error types for cluster module

use thiserror::Error;

/// Cluster error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Launch error: {0}")]
    Launch(String),

    /// The peer process went away before answering.
    #[error("IPC link closed: {0}")]
    LinkClosed(String),

    /// A job reached the coordinator and failed there.
    #[error("Job failed: {0}")]
    Job(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<Error> for vidnode_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => Self::Io(e),
            Error::Serialization(e) => Self::Serialization(e),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
