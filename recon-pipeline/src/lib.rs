//! ProofRail Reconciliation Pipeline
//!
//! Coordinates extraction, matching, archiving, receipt generation, and
//! notification for inbound payment proof submissions. The orchestrator
//! is the only component with cross-cutting knowledge; everything else
//! talks through data contracts.
//!
//! # Guarantees
//!
//! - At most one in-flight validating decision per invoice (per-invoice
//!   exclusive section across the match-to-archive transition)
//! - Archiving, once started, runs to completion or failure; dropping
//!   the caller never leaves a half-written archive
//! - Notification is best-effort and never rolls back durable state

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod invoice;
pub mod notify;
pub mod orchestrator;
pub mod retry;

// Re-exports
pub use config::{PipelineConfig, RetryConfig};
pub use error::{FailureKind, PipelineError, Result, Stage};
pub use invoice::InvoiceDirectory;
pub use notify::{InAppSink, NotificationDispatcher, NotificationSink, ReconciliationEvent};
pub use orchestrator::{
    ReconciliationOrchestrator, ReconciliationSummary, RunOutcome, SubmissionState,
};
