//! Integration tests for the reconciliation pipeline
//!
//! Exercises the orchestrator end-to-end with in-process collaborators:
//! - validated flow (extract → match → archive → receipt → payment)
//! - extraction failure still archiving the proof for review
//! - idempotent resubmission of byte-identical proofs
//! - concurrent submissions against the same invoice
//! - persistence failure after bounded retries

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use recon_archive::{Archive, ArchiveRecord, Error as ArchiveError, FileArchiveStore};
use recon_core::{
    Currency, DocumentKind, ExtractedProofData, ExtractionConfig, ExtractionEngine, InvoiceId,
    InvoiceSnapshot, InvoiceStatus, MatchingConfig, MatchingEngine, MatchingResult, Money,
    ProofSubmission, ReasonCode, ReceiptConfig, ReceiptGenerator, RecognizedText, TextRecognizer,
};
use recon_pipeline::{
    FailureKind, InAppSink, InvoiceDirectory, NotificationDispatcher, NotificationSink,
    ReconciliationEvent, ReconciliationOrchestrator, RetryConfig, RunOutcome, Stage,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const PROOF_TEXT: &[u8] = b"Recu bancaire\n\
    Payeur: Ets Amara\n\
    Reference INV-2024-0031\n\
    Montant: 15,000 TND\n\
    Date: 15/03/2024";

// Recognizer that echoes the document bytes as recognized text; bytes
// starting with CORRUPT yield no text at all.
struct EchoRecognizer;

impl TextRecognizer for EchoRecognizer {
    fn recognize(&self, bytes: &[u8], _kind: DocumentKind) -> recon_core::Result<RecognizedText> {
        let text = if bytes.starts_with(b"CORRUPT") {
            String::new()
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };
        Ok(RecognizedText {
            text,
            confidence: 0.9,
        })
    }
}

struct MemoryInvoiceDirectory {
    invoices: Mutex<Vec<InvoiceSnapshot>>,
    payment_calls: AtomicU32,
}

impl MemoryInvoiceDirectory {
    fn new(invoices: Vec<InvoiceSnapshot>) -> Self {
        Self {
            invoices: Mutex::new(invoices),
            payment_calls: AtomicU32::new(0),
        }
    }

    fn payments_applied(&self) -> u32 {
        self.payment_calls.load(Ordering::SeqCst)
    }

    fn status_of(&self, invoice_id: &InvoiceId) -> Option<InvoiceStatus> {
        self.invoices
            .lock()
            .iter()
            .find(|i| &i.invoice_id == invoice_id)
            .map(|i| i.status)
    }
}

#[async_trait]
impl InvoiceDirectory for MemoryInvoiceDirectory {
    async fn list_candidates(&self) -> anyhow::Result<Vec<InvoiceSnapshot>> {
        Ok(self
            .invoices
            .lock()
            .iter()
            .filter(|i| i.is_matchable())
            .cloned()
            .collect())
    }

    async fn apply_payment(
        &self,
        invoice_id: &InvoiceId,
        amount: Money,
        _proof_record_id: Uuid,
    ) -> anyhow::Result<()> {
        self.payment_calls.fetch_add(1, Ordering::SeqCst);
        let mut invoices = self.invoices.lock();
        let invoice = invoices
            .iter_mut()
            .find(|i| &i.invoice_id == invoice_id)
            .ok_or_else(|| anyhow::anyhow!("unknown invoice {}", invoice_id))?;
        invoice.amount_paid = Money::new(
            invoice.amount_paid.minor_units + amount.minor_units,
            amount.currency,
        );
        invoice.status = if invoice.remaining_due().minor_units <= 0 {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        };
        Ok(())
    }
}

// Archive that always fails its writes, for retry exhaustion tests.
struct FailingArchive {
    calls: AtomicU32,
}

#[async_trait]
impl Archive for FailingArchive {
    async fn archive_proof(
        &self,
        _bytes: &[u8],
        _data: Option<&ExtractedProofData>,
        _matching: Option<&MatchingResult>,
    ) -> recon_archive::Result<ArchiveRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ArchiveError::Persistence("injected write failure".to_string()))
    }

    async fn archive_receipt(
        &self,
        _bytes: &[u8],
        _invoice_id: &InvoiceId,
        _proof_record_id: Uuid,
    ) -> recon_archive::Result<ArchiveRecord> {
        Err(ArchiveError::Persistence("injected write failure".to_string()))
    }

    async fn find(&self, record_id: Uuid) -> recon_archive::Result<ArchiveRecord> {
        Err(ArchiveError::RecordNotFound(record_id.to_string()))
    }

    async fn find_receipt_for(
        &self,
        _invoice_id: &InvoiceId,
        _proof_record_id: Uuid,
    ) -> recon_archive::Result<Option<ArchiveRecord>> {
        Ok(None)
    }
}

struct TestEnvironment {
    orchestrator: ReconciliationOrchestrator,
    archive: Arc<FileArchiveStore>,
    directory: Arc<MemoryInvoiceDirectory>,
    feed: Arc<InAppSink>,
    _tmp: tempfile::TempDir,
}

impl TestEnvironment {
    fn new(invoices: Vec<InvoiceSnapshot>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let archive = Arc::new(FileArchiveStore::open(tmp.path().join("archive")).unwrap());
        let directory = Arc::new(MemoryInvoiceDirectory::new(invoices));
        let feed = Arc::new(InAppSink::new(64));
        let orchestrator = build_orchestrator(
            archive.clone() as Arc<dyn Archive>,
            directory.clone(),
            feed.clone(),
        );
        Self {
            orchestrator,
            archive,
            directory,
            feed,
            _tmp: tmp,
        }
    }
}

fn build_orchestrator(
    archive: Arc<dyn Archive>,
    directory: Arc<MemoryInvoiceDirectory>,
    feed: Arc<InAppSink>,
) -> ReconciliationOrchestrator {
    let extraction = ExtractionEngine::new(ExtractionConfig::default())
        .with_recognizer(DocumentKind::Image, Arc::new(EchoRecognizer))
        .with_recognizer(DocumentKind::Pdf, Arc::new(EchoRecognizer));
    let matching = MatchingEngine::new(MatchingConfig::default()).unwrap();
    let receipts = ReceiptGenerator::new(ReceiptConfig::default());
    let notifier = NotificationDispatcher::new(vec![feed as Arc<dyn NotificationSink>]);
    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 4,
    };
    ReconciliationOrchestrator::new(
        extraction, matching, receipts, archive, directory, notifier, retry,
    )
}

fn open_invoice(id: &str, reference: &str, due_minor: i64) -> InvoiceSnapshot {
    InvoiceSnapshot {
        invoice_id: InvoiceId::new(id),
        reference: reference.to_string(),
        amount_due: Money::new(due_minor, Currency::TND),
        amount_paid: Money::new(0, Currency::TND),
        due_date: NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
        status: InvoiceStatus::Open,
    }
}

fn submission(bytes: &[u8]) -> ProofSubmission {
    ProofSubmission::new(bytes.to_vec(), "image/png", "test")
}

#[tokio::test]
async fn test_validated_end_to_end() {
    let env = TestEnvironment::new(vec![open_invoice("F-31", "INV-2024-0031", 15000)]);

    let summary = env.orchestrator.process(submission(PROOF_TEXT)).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Validated);
    assert_eq!(summary.invoice_id, Some(InvoiceId::new("F-31")));
    assert!(summary.receipt_record_id.is_some());
    assert!(summary.reasons.contains(&ReasonCode::AmountExact));

    // Proof and receipt are durable and linked
    let proof = env.archive.find(summary.proof_record_id).await.unwrap();
    assert_eq!(env.archive.read_bytes(&proof).unwrap(), PROOF_TEXT);
    let receipt = env
        .archive
        .find_receipt_for(&InvoiceId::new("F-31"), summary.proof_record_id)
        .await
        .unwrap();
    assert_eq!(receipt.map(|r| Some(r.record_id)), Some(summary.receipt_record_id));

    // Payment applied exactly once, invoice settled
    assert_eq!(env.directory.payments_applied(), 1);
    assert_eq!(
        env.directory.status_of(&InvoiceId::new("F-31")),
        Some(InvoiceStatus::Paid)
    );

    // Validated event reaches the in-app feed
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(env.feed.events().iter().any(|e| matches!(
        e,
        ReconciliationEvent::Validated { invoice_id, .. } if invoice_id == &InvoiceId::new("F-31")
    )));
}

#[tokio::test]
async fn test_extraction_failure_still_archives_proof() {
    // Scenario D: unreadable document bytes
    let env = TestEnvironment::new(vec![open_invoice("F-31", "INV-2024-0031", 15000)]);

    let summary = env
        .orchestrator
        .process(submission(b"CORRUPT\x00\x01\x02"))
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::PendingReview);
    assert!(summary.reasons.contains(&ReasonCode::ExtractionFailed));
    assert!(summary.receipt_record_id.is_none());
    assert_eq!(env.directory.payments_applied(), 0);

    // The raw proof is still archived for manual handling
    let proof = env.archive.find(summary.proof_record_id).await.unwrap();
    assert!(proof.invoice_id.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(env.feed.events().iter().any(|e| matches!(
        e,
        ReconciliationEvent::PendingReview { reasons, .. }
            if reasons.contains(&ReasonCode::ExtractionFailed)
    )));
}

#[tokio::test]
async fn test_ambiguous_tie_routes_to_review() {
    // Scenario C: two invoices due the same amount, reference matches neither
    let env = TestEnvironment::new(vec![
        open_invoice("F-01", "FACT-100", 15000),
        open_invoice("F-02", "FACT-200", 15000),
    ]);

    let summary = env
        .orchestrator
        .process(submission(
            b"Virement VIR-88\nMontant: 15,000 TND\nDate: 15/03/2024",
        ))
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::PendingReview);
    assert!(summary.reasons.contains(&ReasonCode::MultipleCandidatesTied));
    assert_eq!(env.directory.payments_applied(), 0);
}

#[tokio::test]
async fn test_idempotent_resubmission() {
    let env = TestEnvironment::new(vec![open_invoice("F-31", "INV-2024-0031", 15000)]);

    let first = env.orchestrator.process(submission(PROOF_TEXT)).await.unwrap();
    let second = env.orchestrator.process(submission(PROOF_TEXT)).await.unwrap();

    // Byte-identical content resolves to the same archive record
    assert_eq!(first.proof_record_id, second.proof_record_id);
    assert_eq!(first.outcome, RunOutcome::Validated);

    // The invoice settled on the first run; the rerun cannot validate
    // again and no second receipt or payment is produced
    assert_eq!(second.outcome, RunOutcome::PendingReview);
    assert!(second.receipt_record_id.is_none());
    assert_eq!(env.directory.payments_applied(), 1);
}

#[tokio::test]
async fn test_concurrent_submissions_single_validation() {
    // Scenario E: same proof submitted twice concurrently for one invoice
    let env = TestEnvironment::new(vec![open_invoice("F-31", "INV-2024-0031", 15000)]);

    let (a, b) = tokio::join!(
        env.orchestrator.process(submission(PROOF_TEXT)),
        env.orchestrator.process(submission(PROOF_TEXT)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // Exactly one submission wins the invoice lock and validates
    let validated = [&a, &b]
        .iter()
        .filter(|s| s.outcome == RunOutcome::Validated)
        .count();
    assert_eq!(validated, 1, "exactly one run may validate: {:?} / {:?}", a, b);
    assert_eq!(env.directory.payments_applied(), 1);

    // Both converge on the same archived proof
    assert_eq!(a.proof_record_id, b.proof_record_id);
    assert_eq!(env.orchestrator.active_invoice_locks(), 0);
}

#[tokio::test]
async fn test_invoice_lock_released_after_settlement() {
    let env = TestEnvironment::new(vec![open_invoice("F-31", "INV-2024-0031", 15000)]);

    let summary = env.orchestrator.process(submission(PROOF_TEXT)).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Validated);
    // The exclusive section is torn down once settlement completes
    assert_eq!(env.orchestrator.active_invoice_locks(), 0);
}

#[tokio::test]
async fn test_persistence_failure_exhausts_retries() {
    let archive = Arc::new(FailingArchive {
        calls: AtomicU32::new(0),
    });
    let directory = Arc::new(MemoryInvoiceDirectory::new(vec![open_invoice(
        "F-31",
        "INV-2024-0031",
        15000,
    )]));
    let feed = Arc::new(InAppSink::new(64));
    let orchestrator = build_orchestrator(archive.clone(), directory.clone(), feed);

    let err = orchestrator
        .process(submission(PROOF_TEXT))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Archiving);
    assert!(matches!(err.kind, FailureKind::Persistence(_)));
    // Bounded backoff: one call per configured attempt
    assert_eq!(archive.calls.load(Ordering::SeqCst), 3);
    // No state invented: the payment was never applied
    assert_eq!(directory.payments_applied(), 0);
}
