//! Reconciliation orchestrator
//!
//! Coordinates one submission through extraction, matching, archiving,
//! receipt generation, payment application, and notification. State
//! machine per submission:
//!
//! ```text
//! Received → Extracted → Matched → ArchivingValidated → Notified → Done
//!                              ↘ → ArchivingPending   ↗
//! ```
//!
//! with `Failed(stage, kind)` reachable from any state. Extraction and
//! matching run on the caller's future and may be cancelled by dropping
//! it; everything from archiving onward runs on a spawned task, so a
//! started archive always runs to completion or failure.

use crate::config::RetryConfig;
use crate::error::{FailureKind, PipelineError, Result, Stage};
use crate::invoice::InvoiceDirectory;
use crate::notify::{NotificationDispatcher, ReconciliationEvent};
use crate::retry::with_backoff;
use dashmap::DashMap;
use recon_archive::Archive;
use recon_core::{
    Error as CoreError, ExtractedProofData, ExtractionEngine, InvoiceId, MatchOutcome,
    MatchingEngine, MatchingResult, ProofSubmission, ReasonCode, ReceiptGenerator,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-submission pipeline state, for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    /// Submission accepted, nothing run yet
    Received,
    /// Extraction succeeded
    Extracted,
    /// Matching decision taken
    Matched,
    /// Archiving a validated match
    ArchivingValidated,
    /// Archiving for human review
    ArchivingPending,
    /// Events dispatched (delivery is best-effort)
    Notified,
    /// Terminal success
    Done,
}

/// User-facing outcome of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Payment confirmed against an invoice
    Validated,
    /// Proof received, queued for human review
    PendingReview,
}

/// Terminal outcome summary of one submission
#[derive(Debug, Clone)]
pub struct ReconciliationSummary {
    /// Submission this summarises
    pub submission_id: Uuid,

    /// Run outcome
    pub outcome: RunOutcome,

    /// Matched invoice, present only when validated
    pub invoice_id: Option<InvoiceId>,

    /// Archived proof record
    pub proof_record_id: Uuid,

    /// Archived receipt record, absent when flagged for manual issuance
    pub receipt_record_id: Option<Uuid>,

    /// Reason codes from the matching decision and the pipeline
    pub reasons: Vec<ReasonCode>,
}

/// Reconciliation orchestrator
///
/// Cheap to clone; all heavyweight parts are shared behind `Arc`.
#[derive(Clone)]
pub struct ReconciliationOrchestrator {
    extraction: Arc<ExtractionEngine>,
    matching: MatchingEngine,
    receipts: ReceiptGenerator,
    archive: Arc<dyn Archive>,
    invoices: Arc<dyn InvoiceDirectory>,
    notifier: NotificationDispatcher,
    retry: RetryConfig,
    invoice_locks: Arc<DashMap<InvoiceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for ReconciliationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationOrchestrator")
            .field("locked_invoices", &self.invoice_locks.len())
            .finish()
    }
}

impl ReconciliationOrchestrator {
    /// Create orchestrator over its collaborators
    pub fn new(
        extraction: ExtractionEngine,
        matching: MatchingEngine,
        receipts: ReceiptGenerator,
        archive: Arc<dyn Archive>,
        invoices: Arc<dyn InvoiceDirectory>,
        notifier: NotificationDispatcher,
        retry: RetryConfig,
    ) -> Self {
        Self {
            extraction: Arc::new(extraction),
            matching,
            receipts,
            archive,
            invoices,
            notifier,
            retry,
            invoice_locks: Arc::new(DashMap::new()),
        }
    }

    /// Process one submission to its terminal state
    ///
    /// Returns the outcome summary, or the `(stage, kind)` failure when
    /// the pipeline could not reach a consistent terminal state. Dropping
    /// the returned future before matching completes cancels the run with
    /// no side effects.
    pub async fn process(&self, submission: ProofSubmission) -> Result<ReconciliationSummary> {
        let submission_id = submission.submission_id;
        info!(
            %submission_id,
            channel = %submission.channel,
            mime = %submission.mime_type,
            size = submission.bytes.len(),
            "Step 1: submission received"
        );

        // Step 2: extraction
        let extracted = match self
            .extraction
            .extract(&submission.bytes, &submission.mime_type)
            .await
        {
            Ok(data) => data,
            Err(err @ (CoreError::UnsupportedDocument(_) | CoreError::ExtractionFailed(_))) => {
                // The raw proof is still archived for manual handling
                warn!(%submission_id, %err, "Extraction failed, routing proof to review");
                return self
                    .spawn_finalize_pending(
                        submission,
                        None,
                        None,
                        vec![ReasonCode::ExtractionFailed],
                    )
                    .await;
            }
            Err(err) => {
                return Err(self.fail(
                    submission_id,
                    Stage::Extraction,
                    FailureKind::Internal(err.to_string()),
                ));
            }
        };
        info!(%submission_id, "Step 2: extraction complete");

        // Step 3: matching (total; NoMatch and Ambiguous are outcomes, not errors)
        let candidates = self.invoices.list_candidates().await.map_err(|e| {
            self.fail(
                submission_id,
                Stage::Matching,
                FailureKind::Internal(format!("candidate listing failed: {}", e)),
            )
        })?;
        let result = self.matching.match_proof(&extracted, &candidates);
        info!(
            %submission_id,
            outcome = %result.outcome,
            score = result.score,
            "Step 3: matching decided"
        );

        // Step 4: archive and settle; spawned so a started archive is
        // never aborted by a dropped caller
        match result.outcome {
            MatchOutcome::Validated => {
                self.spawn_finalize_validated(submission, extracted, result)
                    .await
            }
            MatchOutcome::Ambiguous | MatchOutcome::NoMatch => {
                let reasons = result.reasons.clone();
                self.spawn_finalize_pending(submission, Some(extracted), Some(result), reasons)
                    .await
            }
        }
    }

    async fn spawn_finalize_validated(
        &self,
        submission: ProofSubmission,
        extracted: ExtractedProofData,
        result: MatchingResult,
    ) -> Result<ReconciliationSummary> {
        let this = self.clone();
        let task =
            tokio::spawn(async move { this.finalize_validated(submission, extracted, result).await });
        task.await.map_err(|e| {
            PipelineError::new(
                Stage::Archiving,
                FailureKind::Internal(format!("finalize task aborted: {}", e)),
            )
        })?
    }

    async fn spawn_finalize_pending(
        &self,
        submission: ProofSubmission,
        extracted: Option<ExtractedProofData>,
        result: Option<MatchingResult>,
        reasons: Vec<ReasonCode>,
    ) -> Result<ReconciliationSummary> {
        let this = self.clone();
        let task = tokio::spawn(async move {
            this.finalize_pending(submission, extracted, result, reasons)
                .await
        });
        task.await.map_err(|e| {
            PipelineError::new(
                Stage::Archiving,
                FailureKind::Internal(format!("finalize task aborted: {}", e)),
            )
        })?
    }

    async fn finalize_validated(
        &self,
        submission: ProofSubmission,
        extracted: ExtractedProofData,
        result: MatchingResult,
    ) -> Result<ReconciliationSummary> {
        let submission_id = submission.submission_id;
        let invoice_id = result.invoice_id.clone().ok_or_else(|| {
            self.fail(
                submission_id,
                Stage::Matching,
                FailureKind::Internal("validated result carries no invoice id".to_string()),
            )
        })?;

        // Per-invoice exclusive section: held from the matching-outcome
        // re-check through archive and payment application, so two
        // concurrent submissions cannot both validate against the same
        // balance.
        let lock = self
            .invoice_locks
            .entry(invoice_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        // Re-evaluate under the lock; the invoice may have settled since
        let candidates = self.invoices.list_candidates().await.map_err(|e| {
            self.fail(
                submission_id,
                Stage::Matching,
                FailureKind::Internal(format!("candidate re-listing failed: {}", e)),
            )
        })?;
        let recheck = self.matching.match_proof(&extracted, &candidates);
        let still_same = recheck.outcome == MatchOutcome::Validated
            && recheck.invoice_id.as_ref() == Some(&invoice_id);
        if !still_same {
            info!(
                %submission_id,
                %invoice_id,
                recheck = %recheck.outcome,
                "Invoice changed under lock, downgrading to review"
            );
            drop(guard);
            drop(lock);
            self.release_invoice_lock(&invoice_id);
            let reasons = recheck.reasons.clone();
            return self
                .finalize_pending(submission, Some(extracted), Some(recheck), reasons)
                .await;
        }

        info!(%submission_id, %invoice_id, "Step 4: archiving validated proof");

        let proof_record = with_backoff(&self.retry, "archive-proof", || {
            self.archive
                .archive_proof(&submission.bytes, Some(&extracted), Some(&result))
        })
        .await
        .map_err(|e| self.fail(submission_id, Stage::Archiving, e.into()))?;

        // Receipt failure is recoverable: keep the validated match, flag
        // manual issuance
        let mut reasons = result.reasons.clone();
        let receipt_record_id = match self
            .receipts
            .generate(&invoice_id, &extracted, proof_record.record_id)
        {
            Ok(receipt_bytes) => {
                let record = with_backoff(&self.retry, "archive-receipt", || {
                    self.archive
                        .archive_receipt(&receipt_bytes, &invoice_id, proof_record.record_id)
                })
                .await
                .map_err(|e| self.fail(submission_id, Stage::Archiving, e.into()))?;
                Some(record.record_id)
            }
            Err(err) => {
                warn!(%submission_id, %err, "Receipt generation failed, flagging manual issuance");
                reasons.push(ReasonCode::ManualReceiptRequired);
                None
            }
        };

        let amount = extracted.amount.ok_or_else(|| {
            self.fail(
                submission_id,
                Stage::Settlement,
                FailureKind::Internal("validated proof carries no amount".to_string()),
            )
        })?;
        self.invoices
            .apply_payment(&invoice_id, amount, proof_record.record_id)
            .await
            .map_err(|e| {
                self.fail(
                    submission_id,
                    Stage::Settlement,
                    FailureKind::PaymentApplication(e.to_string()),
                )
            })?;
        drop(guard);
        drop(lock);
        self.release_invoice_lock(&invoice_id);

        info!(%submission_id, %invoice_id, "Step 5: payment applied, dispatching events");
        self.notifier.dispatch(ReconciliationEvent::Validated {
            invoice_id: invoice_id.clone(),
            proof_record_id: proof_record.record_id,
            receipt_record_id,
        });

        info!(%submission_id, state = ?SubmissionState::Done, "Submission reconciled");
        Ok(ReconciliationSummary {
            submission_id,
            outcome: RunOutcome::Validated,
            invoice_id: Some(invoice_id),
            proof_record_id: proof_record.record_id,
            receipt_record_id,
            reasons,
        })
    }

    async fn finalize_pending(
        &self,
        submission: ProofSubmission,
        extracted: Option<ExtractedProofData>,
        result: Option<MatchingResult>,
        reasons: Vec<ReasonCode>,
    ) -> Result<ReconciliationSummary> {
        let submission_id = submission.submission_id;
        info!(%submission_id, state = ?SubmissionState::ArchivingPending, "Step 4: archiving proof for review");

        let proof_record = with_backoff(&self.retry, "archive-proof", || {
            self.archive
                .archive_proof(&submission.bytes, extracted.as_ref(), result.as_ref())
        })
        .await
        .map_err(|e| self.fail(submission_id, Stage::Archiving, e.into()))?;

        let invoice_id = result.as_ref().and_then(|r| r.invoice_id.clone());
        self.notifier.dispatch(ReconciliationEvent::PendingReview {
            invoice_id,
            proof_record_id: proof_record.record_id,
            reasons: reasons.clone(),
        });

        info!(%submission_id, state = ?SubmissionState::Done, "Submission queued for review");
        Ok(ReconciliationSummary {
            submission_id,
            outcome: RunOutcome::PendingReview,
            invoice_id: None,
            proof_record_id: proof_record.record_id,
            receipt_record_id: None,
            reasons,
        })
    }

    /// Number of invoices with a live entry in the lock registry
    pub fn active_invoice_locks(&self) -> usize {
        self.invoice_locks.len()
    }

    // Drop the registry entry once no other task holds the lock. The
    // entry API serializes this count check against concurrent lookups
    // on the same key, so a waiter that already cloned the Arc keeps
    // the entry alive.
    fn release_invoice_lock(&self, invoice_id: &InvoiceId) {
        self.invoice_locks
            .remove_if(invoice_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    // Classify, log with submission identity, and build the terminal error.
    fn fail(&self, submission_id: Uuid, stage: Stage, kind: FailureKind) -> PipelineError {
        error!(%submission_id, %stage, %kind, "Pipeline failed");
        PipelineError::new(stage, kind)
    }
}
