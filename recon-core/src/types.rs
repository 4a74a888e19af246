//! Core types for payment proof reconciliation
//!
//! All types are designed for:
//! - Exact arithmetic (integer minor units, Decimal for ratios)
//! - Value semantics (pipeline runs never share mutable state)
//! - Deterministic ordering (invoice id is the reporting tie-break)

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// Tunisian Dinar
    TND,
    /// Euro
    EUR,
    /// US Dollar
    USD,
    /// British Pound
    GBP,
    /// Moroccan Dirham
    MAD,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::TND => "TND",
            Currency::EUR => "EUR",
            Currency::USD => "USD",
            Currency::GBP => "GBP",
            Currency::MAD => "MAD",
        }
    }

    /// Parse from ISO code
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "TND" => Some(Currency::TND),
            "EUR" => Some(Currency::EUR),
            "USD" => Some(Currency::USD),
            "GBP" => Some(Currency::GBP),
            "MAD" => Some(Currency::MAD),
            _ => None,
        }
    }

    /// Minor-unit exponent (TND uses millimes)
    pub fn exponent(&self) -> u32 {
        match self {
            Currency::TND => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Monetary amount in integer minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (millimes for TND, cents otherwise)
    pub minor_units: i64,
    /// Currency
    pub currency: Currency,
}

impl Money {
    /// Create new amount
    pub fn new(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Decimal major-unit value for display and ratio math
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor_units, self.currency.exponent())
    }

    /// Checked subtraction; None on currency mismatch or overflow
    pub fn checked_sub(&self, other: Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        self.minor_units
            .checked_sub(other.minor_units)
            .map(|v| Money::new(v, self.currency))
    }

    /// Absolute difference in minor units; None on currency mismatch
    pub fn abs_diff(&self, other: Money) -> Option<i64> {
        if self.currency != other.currency {
            return None;
        }
        Some((self.minor_units - other.minor_units).abs())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal(), self.currency)
    }
}

/// Invoice identifier
///
/// Ordering on the inner string is the deterministic tie-break used for
/// reporting order in ambiguous results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvoiceId(String);

impl InvoiceId {
    /// Create new invoice ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported document kinds, derived from the declared MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Raster image (photo or scan of a proof)
    Image,
    /// PDF document
    Pdf,
}

impl DocumentKind {
    /// Map a MIME type to a supported kind
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(DocumentKind::Image)
        } else if mime == "application/pdf" {
            Some(DocumentKind::Pdf)
        } else {
            None
        }
    }
}

/// Immutable inbound submission of a payment proof document
#[derive(Debug, Clone)]
pub struct ProofSubmission {
    /// Unique submission ID
    pub submission_id: Uuid,

    /// Raw document bytes
    pub bytes: Vec<u8>,

    /// Declared MIME type as received
    pub mime_type: String,

    /// Arrival timestamp
    pub received_at: DateTime<Utc>,

    /// Source channel label (e.g. "whatsapp", "email")
    pub channel: String,

    /// Optional client-supplied hint (e.g. an invoice reference)
    pub hint_reference: Option<String>,
}

impl ProofSubmission {
    /// Create a submission arriving now
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            submission_id: Uuid::new_v4(),
            bytes,
            mime_type: mime_type.into(),
            received_at: Utc::now(),
            channel: channel.into(),
            hint_reference: None,
        }
    }
}

/// Per-field OCR confidence, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidence {
    /// Confidence in the extracted amount
    pub amount: f64,
    /// Confidence in the extracted reference
    pub reference: f64,
    /// Confidence in the extracted payment date
    pub date: f64,
    /// Confidence in the extracted payer name
    pub payer: f64,
}

impl FieldConfidence {
    /// Uniform confidence across all fields
    pub fn uniform(c: f64) -> Self {
        Self {
            amount: c,
            reference: c,
            date: c,
            payer: c,
        }
    }
}

/// Structured data extracted from a proof document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedProofData {
    /// Paid amount, if recognized
    pub amount: Option<Money>,

    /// Payment date, if recognized
    pub payment_date: Option<NaiveDate>,

    /// Free-text payment reference, if recognized
    pub reference: Option<String>,

    /// Payer name, if recognized
    pub payer_name: Option<String>,

    /// Per-field confidence scores
    pub confidence: FieldConfidence,

    /// Full recognized text after cleanup
    pub raw_text: String,
}

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    /// Issued, nothing paid
    Open,
    /// Partially settled
    PartiallyPaid,
    /// Fully settled (terminal)
    Paid,
    /// Past due date, unpaid
    Overdue,
    /// Cancelled (terminal)
    Cancelled,
}

/// Read-only view of an invoice for matching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    /// Invoice ID
    pub invoice_id: InvoiceId,

    /// Invoice reference string (as printed on the invoice)
    pub reference: String,

    /// Total amount due
    pub amount_due: Money,

    /// Amount already settled against this invoice
    pub amount_paid: Money,

    /// Due date
    pub due_date: NaiveDate,

    /// Current status
    pub status: InvoiceStatus,
}

impl InvoiceSnapshot {
    /// Outstanding balance; partial payments are matched against this,
    /// not the original total
    pub fn remaining_due(&self) -> Money {
        self.amount_due
            .checked_sub(self.amount_paid)
            .unwrap_or(self.amount_due)
    }

    /// Whether this invoice is eligible for matching
    pub fn is_matchable(&self) -> bool {
        matches!(
            self.status,
            InvoiceStatus::Open | InvoiceStatus::PartiallyPaid | InvoiceStatus::Overdue
        )
    }
}

/// Matching outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// Proof confidently matched one invoice
    Validated,
    /// Candidates exist but a human must decide
    Ambiguous,
    /// No candidate reached the review threshold
    NoMatch,
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOutcome::Validated => write!(f, "VALIDATED"),
            MatchOutcome::Ambiguous => write!(f, "AMBIGUOUS"),
            MatchOutcome::NoMatch => write!(f, "NO_MATCH"),
        }
    }
}

/// Reason codes explaining a matching decision, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    /// Amount and currency equal the outstanding balance
    AmountExact,
    /// Amount within the configured relative tolerance
    AmountWithinTolerance,
    /// Normalized references are identical
    ReferenceExactMatch,
    /// References are similar above the fuzzy floor
    ReferenceFuzzyMatch,
    /// Payment date inside the due-date window
    DateWithinWindow,
    /// Two or more candidates scored within the separation margin
    MultipleCandidatesTied,
    /// Amount or reference confidence below the usable minimum
    LowExtractionConfidence,
    /// Candidate list was empty
    NoEligibleCandidates,
    /// Extraction itself failed; proof archived for manual handling
    ExtractionFailed,
    /// Receipt generation failed; manual issuance required
    ManualReceiptRequired,
}

/// One scored candidate invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// Candidate invoice ID
    pub invoice_id: InvoiceId,

    /// Composite score in [0, 1]
    pub score: f64,

    /// Amount signal in [0, 1]
    pub amount_signal: f64,

    /// Reference signal in [0, 1]
    pub reference_signal: f64,

    /// Date signal in [0, 1]
    pub date_signal: f64,
}

/// Immutable decision record produced once per submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    /// Decision
    pub outcome: MatchOutcome,

    /// Matched invoice (Validated) or best candidate (Ambiguous)
    pub invoice_id: Option<InvoiceId>,

    /// Composite score of the top candidate, 0.0 when none
    pub score: f64,

    /// Ordered reason codes
    pub reasons: Vec<ReasonCode>,

    /// Candidates above the review threshold, best first;
    /// tie-break input for the human reviewer on Ambiguous outcomes
    pub candidates: Vec<ScoredCandidate>,
}

impl MatchingResult {
    /// Result for an empty or exhausted candidate set
    pub fn no_match(reasons: Vec<ReasonCode>) -> Self {
        Self {
            outcome: MatchOutcome::NoMatch,
            invoice_id: None,
            score: 0.0,
            reasons,
            candidates: Vec::new(),
        }
    }
}
