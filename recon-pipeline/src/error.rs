//! Pipeline error types
//!
//! Every component failure is mapped to a terminal `(stage, kind)` pair;
//! no downstream error escapes the orchestrator unclassified.

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Document extraction
    Extraction,
    /// Invoice matching
    Matching,
    /// Proof or receipt archiving
    Archiving,
    /// Payment application on the invoice collaborator
    Settlement,
    /// Event dispatch
    Notification,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Extraction => "extraction",
            Stage::Matching => "matching",
            Stage::Archiving => "archiving",
            Stage::Settlement => "settlement",
            Stage::Notification => "notification",
        };
        write!(f, "{}", name)
    }
}

/// Classified failure kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Document empty or of unsupported type
    UnsupportedDocument(String),
    /// No text recoverable, or recognition timed out
    ExtractionFailed(String),
    /// Receipt could not be generated
    ReceiptGeneration(String),
    /// Durable write failed after retries
    Persistence(String),
    /// Invoice collaborator rejected or failed the payment application
    PaymentApplication(String),
    /// Pipeline-internal invariant broke
    Internal(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::UnsupportedDocument(msg) => write!(f, "unsupported document: {}", msg),
            FailureKind::ExtractionFailed(msg) => write!(f, "extraction failed: {}", msg),
            FailureKind::ReceiptGeneration(msg) => write!(f, "receipt generation: {}", msg),
            FailureKind::Persistence(msg) => write!(f, "persistence: {}", msg),
            FailureKind::PaymentApplication(msg) => write!(f, "payment application: {}", msg),
            FailureKind::Internal(msg) => write!(f, "internal: {}", msg),
        }
    }
}

/// Terminal pipeline failure
#[derive(Error, Debug)]
#[error("Pipeline failed in {stage} stage: {kind}")]
pub struct PipelineError {
    /// Stage that failed
    pub stage: Stage,
    /// Classified failure
    pub kind: FailureKind,
}

impl PipelineError {
    /// Create a failure for a stage
    pub fn new(stage: Stage, kind: FailureKind) -> Self {
        Self { stage, kind }
    }
}

impl From<recon_archive::Error> for FailureKind {
    fn from(err: recon_archive::Error) -> Self {
        FailureKind::Persistence(err.to_string())
    }
}
