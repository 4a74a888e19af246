//! Content-addressed file store
//!
//! # On-disk layout
//!
//! ```text
//! <root>/proofs/<hh>/<hash>.bin     - proof bytes
//! <root>/proofs/<hh>/<hash>.json    - record metadata
//! <root>/receipts/<hh>/<hash>.bin   - receipt bytes
//! <root>/receipts/<hh>/<hash>.json  - record metadata
//! ```
//!
//! Bytes are written first, metadata last, both through a temp file and
//! an atomic rename: a record is visible if and only if its metadata
//! sidecar exists. The in-memory index is rebuilt from the sidecars at
//! open, and its insert-if-absent entry is the serialization point for
//! concurrent archivers of identical content.

use crate::error::{Error, Result};
use crate::types::{ArchiveRecord, ContentHash, RecordKind};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use recon_core::{ExtractedProofData, InvoiceId, MatchOutcome, MatchingResult};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Durable archive of proofs and receipts, keyed by content hash
#[async_trait]
pub trait Archive: Send + Sync {
    /// Archive a proof document; idempotent on byte-identical content
    async fn archive_proof(
        &self,
        bytes: &[u8],
        data: Option<&ExtractedProofData>,
        matching: Option<&MatchingResult>,
    ) -> Result<ArchiveRecord>;

    /// Archive a generated receipt bound to (invoice, proof record)
    async fn archive_receipt(
        &self,
        bytes: &[u8],
        invoice_id: &InvoiceId,
        proof_record_id: Uuid,
    ) -> Result<ArchiveRecord>;

    /// Look up a record by id
    async fn find(&self, record_id: Uuid) -> Result<ArchiveRecord>;

    /// Find the receipt archived for a given (invoice, proof record) pair
    async fn find_receipt_for(
        &self,
        invoice_id: &InvoiceId,
        proof_record_id: Uuid,
    ) -> Result<Option<ArchiveRecord>>;
}

type IndexKey = (ContentHash, RecordKind);

/// Filesystem-backed archive store
pub struct FileArchiveStore {
    root: PathBuf,
    index: DashMap<IndexKey, ArchiveRecord>,
    by_id: DashMap<Uuid, IndexKey>,
    receipt_index: DashMap<(InvoiceId, Uuid), IndexKey>,
}

impl std::fmt::Debug for FileArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileArchiveStore")
            .field("root", &self.root)
            .field("records", &self.index.len())
            .finish()
    }
}

impl FileArchiveStore {
    /// Open or create an archive rooted at `root`
    ///
    /// Existing records are indexed by scanning metadata sidecars.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in [RecordKind::Proof, RecordKind::Receipt] {
            fs::create_dir_all(root.join(kind.dir_name()))?;
        }

        let store = Self {
            root,
            index: DashMap::new(),
            by_id: DashMap::new(),
            receipt_index: DashMap::new(),
        };
        store.rebuild_index()?;
        tracing::info!(
            root = %store.root.display(),
            records = store.index.len(),
            "Opened archive store"
        );
        Ok(store)
    }

    fn rebuild_index(&self) -> Result<()> {
        for kind in [RecordKind::Proof, RecordKind::Receipt] {
            let kind_dir = self.root.join(kind.dir_name());
            for shard in fs::read_dir(&kind_dir)? {
                let shard = shard?.path();
                if !shard.is_dir() {
                    continue;
                }
                for entry in fs::read_dir(&shard)? {
                    let path = entry?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let record: ArchiveRecord = serde_json::from_slice(&fs::read(&path)?)?;
                    let key = (record.content_hash.clone(), record.kind);
                    self.by_id.insert(record.record_id, key.clone());
                    self.index_receipt_binding(&record, &key);
                    self.index.insert(key, record);
                }
            }
        }
        Ok(())
    }

    fn blob_path(&self, hash: &ContentHash, kind: RecordKind) -> PathBuf {
        self.root
            .join(kind.dir_name())
            .join(hash.shard())
            .join(format!("{}.bin", hash))
    }

    fn meta_path(&self, hash: &ContentHash, kind: RecordKind) -> PathBuf {
        self.root
            .join(kind.dir_name())
            .join(hash.shard())
            .join(format!("{}.json", hash))
    }

    /// Insert-if-absent on the content hash key. Returns the existing
    /// record when the content is already archived.
    fn insert(
        &self,
        bytes: &[u8],
        kind: RecordKind,
        invoice_id: Option<InvoiceId>,
        proof_record_id: Option<Uuid>,
    ) -> Result<ArchiveRecord> {
        let hash = ContentHash::of(bytes);
        let key = (hash.clone(), kind);

        if let Some(existing) = self.index.get(&key) {
            tracing::debug!(hash = %hash, ?kind, "Duplicate content, returning existing record");
            return Ok(existing.clone());
        }

        // The vacant entry holds the map shard lock across the write, so
        // concurrent archivers of identical bytes serialize here and the
        // loser observes the winner's record.
        match self.index.entry(key.clone()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let meta_path = self.meta_path(&hash, kind);
                if meta_path.exists() {
                    // Another process archived this content
                    let record: ArchiveRecord =
                        serde_json::from_slice(&fs::read(&meta_path)?)?;
                    self.by_id.insert(record.record_id, key.clone());
                    self.index_receipt_binding(&record, &key);
                    vacant.insert(record.clone());
                    return Ok(record);
                }

                let blob_path = self.blob_path(&hash, kind);
                let record = ArchiveRecord {
                    record_id: Uuid::new_v4(),
                    content_hash: hash.clone(),
                    kind,
                    location: blob_path.clone(),
                    invoice_id,
                    proof_record_id,
                    created_at: Utc::now(),
                };

                write_atomic(&blob_path, bytes)?;
                write_atomic(&meta_path, &serde_json::to_vec_pretty(&record)?)?;

                tracing::info!(
                    record_id = %record.record_id,
                    hash = %hash,
                    ?kind,
                    "Archived new record"
                );
                self.by_id.insert(record.record_id, key.clone());
                self.index_receipt_binding(&record, &key);
                vacant.insert(record.clone());
                Ok(record)
            }
        }
    }

    // Secondary index for receipt lookup by (invoice, proof record).
    fn index_receipt_binding(&self, record: &ArchiveRecord, key: &IndexKey) {
        if record.kind != RecordKind::Receipt {
            return;
        }
        if let (Some(invoice_id), Some(proof_id)) = (&record.invoice_id, record.proof_record_id) {
            self.receipt_index
                .insert((invoice_id.clone(), proof_id), key.clone());
        }
    }

    /// Read back the stored bytes for a record
    pub fn read_bytes(&self, record: &ArchiveRecord) -> Result<Vec<u8>> {
        Ok(fs::read(&record.location)?)
    }
}

#[async_trait]
impl Archive for FileArchiveStore {
    async fn archive_proof(
        &self,
        bytes: &[u8],
        data: Option<&ExtractedProofData>,
        matching: Option<&MatchingResult>,
    ) -> Result<ArchiveRecord> {
        // Invoice association is recorded only for confirmed matches
        let invoice_id = matching
            .filter(|m| m.outcome == MatchOutcome::Validated)
            .and_then(|m| m.invoice_id.clone());
        if let Some(data) = data {
            tracing::debug!(
                reference = ?data.reference,
                amount = ?data.amount,
                "Archiving proof with extracted fields"
            );
        }
        self.insert(bytes, RecordKind::Proof, invoice_id, None)
    }

    async fn archive_receipt(
        &self,
        bytes: &[u8],
        invoice_id: &InvoiceId,
        proof_record_id: Uuid,
    ) -> Result<ArchiveRecord> {
        self.insert(
            bytes,
            RecordKind::Receipt,
            Some(invoice_id.clone()),
            Some(proof_record_id),
        )
    }

    async fn find(&self, record_id: Uuid) -> Result<ArchiveRecord> {
        let key = self
            .by_id
            .get(&record_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::RecordNotFound(record_id.to_string()))?;
        self.index
            .get(&key)
            .map(|r| r.clone())
            .ok_or_else(|| Error::RecordNotFound(record_id.to_string()))
    }

    async fn find_receipt_for(
        &self,
        invoice_id: &InvoiceId,
        proof_record_id: Uuid,
    ) -> Result<Option<ArchiveRecord>> {
        let Some(key) = self
            .receipt_index
            .get(&(invoice_id.clone(), proof_record_id))
            .map(|entry| entry.clone())
        else {
            return Ok(None);
        };
        Ok(self.index.get(&key).map(|record| record.clone()))
    }
}

// Write through a temp file and rename so the target is never partial.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Persistence(format!("no parent dir for {}", path.display())))?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::Persistence(format!("rename into {} failed: {}", path.display(), e))
    })?;
    Ok(())
}
