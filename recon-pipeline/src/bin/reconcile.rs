//! Local reconciliation runner
//!
//! Runs one submission through the full pipeline against a JSON list of
//! candidate invoices. The recognition model is an external capability,
//! so recognized text is supplied as a sidecar file:
//!
//! ```text
//! reconcile <document> <mime-type> <ocr-text-file> <invoices.json> [config.toml]
//! ```

use anyhow::{bail, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use recon_archive::FileArchiveStore;
use recon_core::{
    DocumentKind, ExtractionEngine, InvoiceId, InvoiceSnapshot, InvoiceStatus, MatchingEngine,
    Money, ProofSubmission, ReceiptGenerator, RecognizedText, TextRecognizer,
};
use recon_pipeline::{
    InAppSink, InvoiceDirectory, NotificationDispatcher, PipelineConfig,
    ReconciliationOrchestrator,
};
use std::sync::Arc;
use uuid::Uuid;

// Recognition output comes from a sidecar file instead of a live OCR
// backend.
struct SidecarRecognizer {
    text: String,
    confidence: f64,
}

impl TextRecognizer for SidecarRecognizer {
    fn recognize(&self, _bytes: &[u8], _kind: DocumentKind) -> recon_core::Result<RecognizedText> {
        Ok(RecognizedText {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }
}

// Invoice directory over a JSON snapshot file; payments are applied in
// memory and logged.
struct JsonInvoiceDirectory {
    invoices: Mutex<Vec<InvoiceSnapshot>>,
}

#[async_trait]
impl InvoiceDirectory for JsonInvoiceDirectory {
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
        proof_record_id: Uuid,
    ) -> anyhow::Result<()> {
        let mut invoices = self.invoices.lock();
        let invoice = invoices
            .iter_mut()
            .find(|i| &i.invoice_id == invoice_id)
            .context("invoice disappeared")?;
        invoice.amount_paid = Money::new(
            invoice.amount_paid.minor_units + amount.minor_units,
            amount.currency,
        );
        if invoice.remaining_due().minor_units <= 0 {
            invoice.status = InvoiceStatus::Paid;
        }
        tracing::info!(%invoice_id, %amount, %proof_record_id, "Payment applied");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 5 {
        bail!("usage: reconcile <document> <mime-type> <ocr-text-file> <invoices.json> [config.toml]");
    }

    let config = match args.get(5) {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::from_env(),
    };

    let document = std::fs::read(&args[1]).context("reading document")?;
    let ocr_text = std::fs::read_to_string(&args[3]).context("reading OCR sidecar")?;
    let invoices: Vec<InvoiceSnapshot> =
        serde_json::from_str(&std::fs::read_to_string(&args[4]).context("reading invoices")?)?;

    let recognizer = Arc::new(SidecarRecognizer {
        text: ocr_text,
        confidence: 0.9,
    });
    let extraction = ExtractionEngine::new(config.extraction.clone())
        .with_recognizer(DocumentKind::Image, recognizer.clone())
        .with_recognizer(DocumentKind::Pdf, recognizer);
    let matching = MatchingEngine::new(config.matching.clone())?;
    let receipts = ReceiptGenerator::new(config.receipt.clone());
    let archive = Arc::new(FileArchiveStore::open(config.archive_dir.clone())?);
    let directory = Arc::new(JsonInvoiceDirectory {
        invoices: Mutex::new(invoices),
    });
    let notifier = NotificationDispatcher::new(vec![Arc::new(InAppSink::new(64))]);

    let orchestrator = ReconciliationOrchestrator::new(
        extraction,
        matching,
        receipts,
        archive,
        directory,
        notifier,
        config.retry.clone(),
    );

    let submission = ProofSubmission::new(document, args[2].clone(), "cli");
    let summary = orchestrator.process(submission).await?;

    println!("outcome:    {:?}", summary.outcome);
    if let Some(invoice_id) = &summary.invoice_id {
        println!("invoice:    {}", invoice_id);
    }
    println!("proof:      {}", summary.proof_record_id);
    if let Some(receipt_id) = summary.receipt_record_id {
        println!("receipt:    {}", receipt_id);
    }
    println!("reasons:    {:?}", summary.reasons);

    Ok(())
}
