//! ProofRail Reconciliation Core
//!
//! Domain types and decision logic for the payment proof reconciliation
//! pipeline: OCR-backed field extraction, fuzzy invoice matching, and
//! deterministic receipt generation.
//!
//! # Invariants
//!
//! - Amount dominance: no proof validates without at least an
//!   amount-within-tolerance signal, whatever the other signals say
//! - Confidence gating: low-confidence extractions never auto-validate
//! - Determinism: same extracted data + same candidates → same result

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod extract;
pub mod matching;
pub mod receipt;
pub mod types;

// Re-exports
pub use config::{ExtractionConfig, MatchingConfig, ReceiptConfig};
pub use error::{Error, Result};
pub use extract::{ExtractionEngine, RecognizedText, TextRecognizer};
pub use matching::MatchingEngine;
pub use receipt::ReceiptGenerator;
pub use types::{
    Currency, DocumentKind, ExtractedProofData, FieldConfidence, InvoiceId, InvoiceSnapshot,
    InvoiceStatus, MatchOutcome, MatchingResult, Money, ProofSubmission, ReasonCode,
    ScoredCandidate,
};
