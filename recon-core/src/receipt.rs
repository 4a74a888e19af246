//! Receipt generator
//!
//! Produces the durable receipt document for a validated (invoice, proof)
//! pair. Output is canonical JSON with a stable field order and no
//! wall-clock or random content, so regenerating a receipt for the same
//! inputs is byte-identical and the archive's content-hash dedup makes
//! re-issuance idempotent. Issue time lives on the archive record, not in
//! the document body.

use crate::config::ReceiptConfig;
use crate::error::{Error, Result};
use crate::types::{ExtractedProofData, InvoiceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Receipt document body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptDocument {
    /// Document type marker
    pub kind: String,

    /// Issuer name
    pub issuer: String,

    /// Issuer locality
    pub location: String,

    /// Settled invoice
    pub invoice_id: InvoiceId,

    /// Amount paid, in minor units
    pub amount_minor_units: i64,

    /// Currency code
    pub currency: String,

    /// Payment date (ISO), when recognized
    pub payment_date: Option<String>,

    /// Payment reference from the proof, when recognized
    pub reference: Option<String>,

    /// Payer name from the proof, when recognized
    pub payer_name: Option<String>,

    /// Archive record id of the proof this receipt is bound to
    pub proof_record_id: Uuid,
}

/// Receipt generator
#[derive(Debug, Clone)]
pub struct ReceiptGenerator {
    config: ReceiptConfig,
}

impl ReceiptGenerator {
    /// Create generator with issuer details
    pub fn new(config: ReceiptConfig) -> Self {
        Self { config }
    }

    /// Generate receipt bytes for a validated match
    ///
    /// Callers must only invoke this after a Validated outcome. Fails with
    /// [`Error::ReceiptGeneration`] when the extracted data carries no
    /// amount; the caller then archives the proof and flags the receipt
    /// for manual issuance.
    pub fn generate(
        &self,
        invoice_id: &InvoiceId,
        data: &ExtractedProofData,
        proof_record_id: Uuid,
    ) -> Result<Vec<u8>> {
        let amount = data.amount.ok_or_else(|| {
            Error::ReceiptGeneration("validated proof carries no amount".to_string())
        })?;

        let document = ReceiptDocument {
            kind: "payment-receipt".to_string(),
            issuer: self.config.issuer.clone(),
            location: self.config.location.clone(),
            invoice_id: invoice_id.clone(),
            amount_minor_units: amount.minor_units,
            currency: amount.currency.code().to_string(),
            payment_date: data.payment_date.map(|d| d.format("%Y-%m-%d").to_string()),
            reference: data.reference.clone(),
            payer_name: data.payer_name.clone(),
            proof_record_id,
        };

        serde_json::to_vec_pretty(&document)
            .map_err(|e| Error::ReceiptGeneration(format!("serialization failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, FieldConfidence, Money};
    use chrono::NaiveDate;

    fn data() -> ExtractedProofData {
        ExtractedProofData {
            amount: Some(Money::new(15000, Currency::TND)),
            payment_date: NaiveDate::from_ymd_opt(2024, 3, 15),
            reference: Some("INV-2024-0031".to_string()),
            payer_name: Some("Ets Amara".to_string()),
            confidence: FieldConfidence::uniform(0.9),
            raw_text: "…".to_string(),
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let generator = ReceiptGenerator::new(ReceiptConfig::default());
        let invoice = InvoiceId::new("F-31");
        let proof_id = Uuid::nil();
        let first = generator.generate(&invoice, &data(), proof_id).unwrap();
        let second = generator.generate(&invoice, &data(), proof_id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_receipt_round_trips_fields() {
        let generator = ReceiptGenerator::new(ReceiptConfig::default());
        let bytes = generator
            .generate(&InvoiceId::new("F-31"), &data(), Uuid::nil())
            .unwrap();
        let doc: ReceiptDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc.invoice_id, InvoiceId::new("F-31"));
        assert_eq!(doc.amount_minor_units, 15000);
        assert_eq!(doc.currency, "TND");
        assert_eq!(doc.payment_date.as_deref(), Some("2024-03-15"));
    }

    #[test]
    fn test_missing_amount_is_recoverable_error() {
        let generator = ReceiptGenerator::new(ReceiptConfig::default());
        let mut incomplete = data();
        incomplete.amount = None;
        let err = generator
            .generate(&InvoiceId::new("F-31"), &incomplete, Uuid::nil())
            .unwrap_err();
        assert!(matches!(err, Error::ReceiptGeneration(_)));
    }
}
