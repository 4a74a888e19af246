//! ProofRail Archive Store
//!
//! Content-addressed, idempotent persistence of payment proofs and
//! generated receipts. The content hash of the stored bytes is the
//! identity key: archiving byte-identical content twice returns the
//! existing record, even under concurrent submissions.
//!
//! # Invariants
//!
//! - At most one record per (content hash, kind)
//! - A record is either fully visible (bytes + metadata) or not visible
//!   at all, never partially written
//! - Records are never modified or deleted once visible

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod store;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use store::{Archive, FileArchiveStore};
pub use types::{ArchiveRecord, ContentHash, RecordKind};
