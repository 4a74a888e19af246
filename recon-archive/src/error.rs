//! Error types for the archive store

use thiserror::Error;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Archive errors
#[derive(Error, Debug)]
pub enum Error {
    /// Durable write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Metadata serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
