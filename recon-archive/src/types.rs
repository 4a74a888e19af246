//! Archive record types

use chrono::{DateTime, Utc};
use recon_core::InvoiceId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Hex-encoded SHA-256 digest of stored bytes; the archive identity key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a byte slice
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(hex_encode(&digest))
    }

    /// Get as hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard prefix for the on-disk layout
    ///
    /// A malformed hash shorter than the prefix (a truncated metadata
    /// sidecar) shards under its full value instead of panicking.
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or(self.0.as_str())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

/// Kind of archived evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Original proof document as submitted
    Proof,
    /// Generated receipt document
    Receipt,
}

impl RecordKind {
    /// Directory name for the on-disk layout
    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordKind::Proof => "proofs",
            RecordKind::Receipt => "receipts",
        }
    }
}

/// Persisted evidence record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Record ID
    pub record_id: Uuid,

    /// Content hash of the stored bytes
    pub content_hash: ContentHash,

    /// Kind of evidence
    pub kind: RecordKind,

    /// Storage location of the bytes
    pub location: PathBuf,

    /// Associated invoice, when matched
    pub invoice_id: Option<InvoiceId>,

    /// For receipts, the proof record this receipt is bound to
    pub proof_record_id: Option<Uuid>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = ContentHash::of(b"payment proof bytes");
        let b = ContentHash::of(b"payment proof bytes");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_content_hash_differs_per_content() {
        assert_ne!(ContentHash::of(b"a"), ContentHash::of(b"b"));
    }

    #[test]
    fn test_shard_prefix() {
        let hash = ContentHash::of(b"x");
        assert_eq!(hash.shard(), &hash.as_str()[..2]);
    }

    #[test]
    fn test_shard_of_truncated_hash_does_not_panic() {
        let short: ContentHash = serde_json::from_str("\"a\"").unwrap();
        assert_eq!(short.shard(), "a");
        let empty: ContentHash = serde_json::from_str("\"\"").unwrap();
        assert_eq!(empty.shard(), "");
    }
}
