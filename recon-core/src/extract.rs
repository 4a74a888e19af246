//! Extraction engine
//!
//! Turns raw document bytes into [`ExtractedProofData`] by routing the
//! document to a MIME-specific text recognition capability and parsing
//! the recognized text with field patterns. Recognition itself (OCR for
//! images, text layer for PDFs) is a black box behind [`TextRecognizer`];
//! this module owns routing, the time budget, text cleanup, and field
//! parsing.
//!
//! Low-quality input lowers per-field confidence instead of failing; the
//! engine only errors when the document is unsupported or no text at all
//! is recoverable.

use crate::config::ExtractionConfig;
use crate::error::{Error, ExtractionFailure, Result};
use crate::types::{Currency, DocumentKind, ExtractedProofData, FieldConfidence, Money};
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::OnceLock;

/// Output of one recognition call
#[derive(Debug, Clone)]
pub struct RecognizedText {
    /// Recognized text, untrimmed
    pub text: String,

    /// Overall recognition confidence in [0, 1]
    pub confidence: f64,
}

/// Text recognition capability, one implementation per document kind
///
/// Implementations may block (OCR engines usually do); the extraction
/// engine runs them on the blocking pool under a timeout.
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in a document
    fn recognize(&self, bytes: &[u8], kind: DocumentKind) -> Result<RecognizedText>;
}

/// Extraction engine routing documents to recognizers by kind
pub struct ExtractionEngine {
    recognizers: HashMap<DocumentKind, Arc<dyn TextRecognizer>>,
    config: ExtractionConfig,
}

impl std::fmt::Debug for ExtractionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionEngine")
            .field("kinds", &self.recognizers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionEngine {
    /// Create engine with no recognizers registered
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            recognizers: HashMap::new(),
            config,
        }
    }

    /// Register a recognizer for a document kind
    pub fn with_recognizer(
        mut self,
        kind: DocumentKind,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        self.recognizers.insert(kind, recognizer);
        self
    }

    /// Extract structured payment data from a document
    ///
    /// Fails with [`Error::UnsupportedDocument`] on empty bytes or an
    /// unsupported MIME type, and with [`Error::ExtractionFailed`] on
    /// timeout or when no text is recoverable.
    pub async fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<ExtractedProofData> {
        if bytes.is_empty() {
            return Err(Error::UnsupportedDocument("empty document".to_string()));
        }
        let kind = DocumentKind::from_mime(mime_type).ok_or_else(|| {
            Error::UnsupportedDocument(format!("unsupported MIME type: {}", mime_type))
        })?;
        let recognizer = self
            .recognizers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no recognizer registered for {:?}", kind)))?;

        let owned = bytes.to_vec();
        let task = tokio::task::spawn_blocking(move || recognizer.recognize(&owned, kind));

        let recognized = match tokio::time::timeout(self.config.recognition_timeout(), task).await {
            Err(_) => {
                tracing::warn!("Recognition timed out after {:?}", self.config.recognition_timeout());
                return Err(Error::ExtractionFailed(ExtractionFailure::Timeout));
            }
            Ok(Err(join_err)) => {
                tracing::error!("Recognition task failed: {}", join_err);
                return Err(Error::ExtractionFailed(ExtractionFailure::Backend));
            }
            Ok(Ok(result)) => result?,
        };

        let text = clean_text(&recognized.text);
        if text.trim().is_empty() {
            return Err(Error::ExtractionFailed(ExtractionFailure::NoText));
        }

        let base = recognized.confidence.clamp(0.0, 1.0);
        let penalty = self.config.missing_field_penalty.clamp(0.0, 1.0);

        let amount = parse_amount(&text);
        let reference = parse_reference(&text);
        let payment_date = parse_date(&text);
        let payer_name = parse_payer(&text);

        let field = |present: bool| if present { base } else { base * penalty };
        let confidence = FieldConfidence {
            amount: field(amount.is_some()),
            reference: field(reference.is_some()),
            date: field(payment_date.is_some()),
            payer: field(payer_name.is_some()),
        };

        tracing::debug!(
            amount = ?amount,
            reference = ?reference,
            date = ?payment_date,
            "Extracted proof fields"
        );

        Ok(ExtractedProofData {
            amount,
            payment_date,
            reference,
            payer_name,
            confidence,
            raw_text: text,
        })
    }
}

/// Collapse runs of spaces and tabs, drop carriage returns, keep newlines
pub fn clean_text(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn reference_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)\bREF-[0-9]+\b").expect("static regex"),
            Regex::new(r"(?i)\bINV-[0-9]{4}-[0-9]+\b").expect("static regex"),
            Regex::new(r"(?i)\bINV-[0-9]+\b").expect("static regex"),
            Regex::new(r"(?i)\bFACT-[0-9]+\b").expect("static regex"),
            Regex::new(r"(?i)n[°oO]\s*:?\s*[0-9]+").expect("static regex"),
            Regex::new(r"(?i)facture\s*:?\s*[0-9]+").expect("static regex"),
        ]
    })
}

/// Extract a payment reference; patterns tried in priority order
pub fn parse_reference(text: &str) -> Option<String> {
    for pattern in reference_patterns() {
        if let Some(m) = pattern.find(text) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

/// Extract the paid amount with its currency
///
/// Supports thousand separators (space or dot), comma or point decimals,
/// and 2- or 3-digit minor parts (TND uses millimes). When no decimal
/// form is present, a bare integer next to a currency marker is read as
/// minor units. Currency defaults to TND when only a local "DT" marker
/// or no marker is present.
pub fn parse_amount(text: &str) -> Option<Money> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(TND|DT|EUR|€|USD|\$|GBP|£|MAD)?\s*([0-9]{1,3}(?:[ .][0-9]{3})*[.,][0-9]{2,3})\s*(TND|DT|EUR|€|USD|\$|GBP|£|MAD)?",
        )
        .expect("static regex")
    });

    if let Some(caps) = re.captures(text) {
        let symbol = caps
            .get(1)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or("");
        let currency = currency_from_marker(symbol);
        let normalized = normalize_number(caps.get(2)?.as_str());
        let value = Decimal::from_str(&normalized).ok()?;
        let scale = Decimal::from(10i64.pow(currency.exponent()));
        let minor = (value * scale).trunc().to_i64()?;
        return Some(Money::new(minor, currency));
    }

    parse_plain_amount(text)
}

// Fallback for amounts written without a decimal part ("15000 TND").
// A currency marker is mandatory here, otherwise any digit run (dates,
// reference numbers) would be swallowed as an amount.
fn parse_plain_amount(text: &str) -> Option<Money> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:(TND|DT|EUR|€|USD|\$|GBP|£|MAD)\s*)?\b([0-9]{1,12})\b(?:\s*(TND|DT|EUR|€|USD|\$|GBP|£|MAD))?",
        )
        .expect("static regex")
    });

    for caps in re.captures_iter(text) {
        let Some(marker) = caps.get(1).or_else(|| caps.get(3)) else {
            continue;
        };
        let minor: i64 = caps.get(2)?.as_str().parse().ok()?;
        return Some(Money::new(minor, currency_from_marker(marker.as_str())));
    }
    None
}

fn currency_from_marker(marker: &str) -> Currency {
    match marker.to_ascii_uppercase().as_str() {
        "EUR" | "€" => Currency::EUR,
        "USD" | "$" => Currency::USD,
        "GBP" | "£" => Currency::GBP,
        "MAD" => Currency::MAD,
        _ => Currency::TND,
    }
}

// Last '.' or ',' is the decimal separator; everything else is grouping.
fn normalize_number(s: &str) -> String {
    let decimal_pos = s.rfind(|c| c == '.' || c == ',');
    s.char_indices()
        .filter_map(|(i, c)| match c {
            ' ' => None,
            '.' | ',' => {
                if Some(i) == decimal_pos {
                    Some('.')
                } else {
                    None
                }
            }
            _ => Some(c),
        })
        .collect()
}

/// Extract the payment date; dd/mm/yyyy, dd-mm-yyyy, and ISO forms
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    static DMY: OnceLock<Regex> = OnceLock::new();
    static ISO: OnceLock<Regex> = OnceLock::new();
    let dmy = DMY.get_or_init(|| {
        Regex::new(r"\b([0-9]{2})[/-]([0-9]{2})[/-]([0-9]{4})\b").expect("static regex")
    });
    let iso = ISO.get_or_init(|| {
        Regex::new(r"\b([0-9]{4})-([0-9]{2})-([0-9]{2})\b").expect("static regex")
    });

    if let Some(caps) = iso.captures(text) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    if let Some(caps) = dmy.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    None
}

/// Extract the payer name from a labelled line
pub fn parse_payer(text: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^(?:payeur|payer|client|de la part de)\s*:?\s*(.+)$")
            .expect("static regex")
    });
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRecognizer {
        text: String,
        confidence: f64,
    }

    impl TextRecognizer for FixedRecognizer {
        fn recognize(&self, _bytes: &[u8], _kind: DocumentKind) -> Result<RecognizedText> {
            Ok(RecognizedText {
                text: self.text.clone(),
                confidence: self.confidence,
            })
        }
    }

    struct FailingRecognizer;

    impl TextRecognizer for FailingRecognizer {
        fn recognize(&self, _bytes: &[u8], _kind: DocumentKind) -> Result<RecognizedText> {
            Err(Error::ExtractionFailed(ExtractionFailure::Backend))
        }
    }

    struct SlowRecognizer;

    impl TextRecognizer for SlowRecognizer {
        fn recognize(&self, _bytes: &[u8], _kind: DocumentKind) -> Result<RecognizedText> {
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok(RecognizedText {
                text: "too late".to_string(),
                confidence: 0.9,
            })
        }
    }

    fn engine_with(text: &str, confidence: f64) -> ExtractionEngine {
        ExtractionEngine::new(ExtractionConfig::default()).with_recognizer(
            DocumentKind::Image,
            Arc::new(FixedRecognizer {
                text: text.to_string(),
                confidence,
            }),
        )
    }

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("a\t b   c\r\nd"), "a b c\nd");
    }

    #[test]
    fn test_parse_reference_formats() {
        assert_eq!(parse_reference("Virement REF-12345 reçu"), Some("REF-12345".into()));
        assert_eq!(
            parse_reference("paiement facture INV-2024-0031 merci"),
            Some("INV-2024-0031".into())
        );
        assert_eq!(parse_reference("FACT-778"), Some("FACT-778".into()));
        assert_eq!(parse_reference("Facture : 4521"), Some("Facture : 4521".into()));
        assert_eq!(parse_reference("aucune référence ici"), None);
    }

    #[test]
    fn test_parse_amount_tnd_millimes() {
        let m = parse_amount("Montant payé : 15,000 DT").unwrap();
        assert_eq!(m, Money::new(15000, Currency::TND));
    }

    #[test]
    fn test_parse_amount_thousand_separators() {
        let m = parse_amount("total 1 500,00 EUR").unwrap();
        assert_eq!(m, Money::new(150_000, Currency::EUR));
        let m = parse_amount("USD 2.500,50").unwrap();
        assert_eq!(m, Money::new(250_050, Currency::USD));
    }

    #[test]
    fn test_parse_amount_plain_integer_minor_units() {
        let m = parse_amount("Montant: 15000 TND").unwrap();
        assert_eq!(m, Money::new(15000, Currency::TND));
        let m = parse_amount("DT 5000").unwrap();
        assert_eq!(m, Money::new(5000, Currency::TND));
    }

    #[test]
    fn test_plain_integer_requires_currency_marker() {
        // Reference digits and dates must not be read as amounts
        assert_eq!(parse_amount("Reference 123456 le 15/03/2024"), None);
    }

    #[test]
    fn test_parse_amount_defaults_to_tnd() {
        let m = parse_amount("somme de 42,500 versée").unwrap();
        assert_eq!(m.currency, Currency::TND);
        assert_eq!(m.minor_units, 42_500);
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(
            parse_date("payé le 15/03/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            parse_date("date: 2024-03-15"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(parse_date("le 99/99/2024"), None);
    }

    #[test]
    fn test_parse_payer() {
        assert_eq!(
            parse_payer("Payeur : Société Atlas\nMontant: 10,000"),
            Some("Société Atlas".into())
        );
        assert_eq!(parse_payer("pas de nom"), None);
    }

    #[tokio::test]
    async fn test_extract_full_document() {
        let engine = engine_with(
            "Reçu bancaire\nPayeur: Ets Amara\nFacture INV-2024-0031\nMontant: 15,000 TND\nDate: 15/03/2024",
            0.9,
        );
        let data = engine.extract(b"fake-image", "image/png").await.unwrap();
        assert_eq!(data.amount, Some(Money::new(15000, Currency::TND)));
        assert_eq!(data.reference.as_deref(), Some("INV-2024-0031"));
        assert_eq!(data.payment_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert!((data.confidence.amount - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_low_quality_lowers_confidence_instead_of_failing() {
        let engine = engine_with("texte illisible sans montant ni reference", 0.3);
        let data = engine.extract(b"blurry", "image/jpeg").await.unwrap();
        assert!(data.amount.is_none());
        assert!(data.confidence.amount < 0.3);
    }

    #[tokio::test]
    async fn test_empty_bytes_rejected() {
        let engine = engine_with("whatever", 0.9);
        let err = engine.extract(b"", "image/png").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedDocument(_)));
    }

    #[tokio::test]
    async fn test_unsupported_mime_rejected() {
        let engine = engine_with("whatever", 0.9);
        let err = engine.extract(b"bytes", "text/html").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedDocument(_)));
    }

    #[tokio::test]
    async fn test_whitespace_only_text_fails() {
        let engine = engine_with("   \n\t  ", 0.9);
        let err = engine.extract(b"bytes", "image/png").await.unwrap_err();
        assert!(matches!(
            err,
            Error::ExtractionFailed(ExtractionFailure::NoText)
        ));
    }

    #[tokio::test]
    async fn test_recognition_timeout_fails_extraction() {
        let config = ExtractionConfig {
            recognition_timeout_ms: 10,
            ..Default::default()
        };
        let engine = ExtractionEngine::new(config)
            .with_recognizer(DocumentKind::Image, Arc::new(SlowRecognizer));
        let err = engine.extract(b"bytes", "image/png").await.unwrap_err();
        assert!(matches!(
            err,
            Error::ExtractionFailed(ExtractionFailure::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let engine = ExtractionEngine::new(ExtractionConfig::default())
            .with_recognizer(DocumentKind::Pdf, Arc::new(FailingRecognizer));
        let err = engine.extract(b"bytes", "application/pdf").await.unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
    }
}
