//! Error types for the reconciliation core

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Document is empty or of an unsupported MIME type
    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),

    /// Recognition produced no usable text
    #[error("Extraction failed: {0}")]
    ExtractionFailed(ExtractionFailure),

    /// Receipt could not be generated (recoverable, match stays valid)
    #[error("Receipt generation failed: {0}")]
    ReceiptGeneration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an extraction attempt failed outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// Recognition call exceeded its time budget
    Timeout,
    /// Recognizer returned empty or whitespace-only text
    NoText,
    /// Underlying recognition backend reported an error
    Backend,
}

impl std::fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionFailure::Timeout => write!(f, "recognition timed out"),
            ExtractionFailure::NoText => write!(f, "no text recoverable from document"),
            ExtractionFailure::Backend => write!(f, "recognition backend error"),
        }
    }
}
