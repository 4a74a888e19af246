//! Invoice collaborator interface
//!
//! The pipeline never mutates invoices in-process: it reads candidate
//! snapshots and requests state transitions through this trait. Balance
//! re-checks on payment application are the collaborator's concern.

use async_trait::async_trait;
use recon_core::{InvoiceId, InvoiceSnapshot, Money};
use uuid::Uuid;

/// External invoice domain, behind a stable interface
#[async_trait]
pub trait InvoiceDirectory: Send + Sync {
    /// List invoices eligible for matching (Open, PartiallyPaid, Overdue)
    async fn list_candidates(&self) -> anyhow::Result<Vec<InvoiceSnapshot>>;

    /// Apply a validated payment to an invoice
    ///
    /// Called only after a Validated outcome, under the per-invoice
    /// exclusive section, with the archived proof record as evidence.
    /// Re-checking the balance is the collaborator's own consistency
    /// concern.
    async fn apply_payment(
        &self,
        invoice_id: &InvoiceId,
        amount: Money,
        proof_record_id: Uuid,
    ) -> anyhow::Result<()>;
}
