//! Configuration for extraction, matching, and receipts

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Extraction engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Time budget for one recognition call, in milliseconds
    pub recognition_timeout_ms: u64,

    /// Confidence penalty applied to a field whose pattern did not match
    pub missing_field_penalty: f64,
}

impl ExtractionConfig {
    /// Recognition timeout as a Duration
    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            recognition_timeout_ms: 15_000,
            missing_field_penalty: 0.5,
        }
    }
}

/// Matching engine configuration
///
/// All thresholds are tunables; the decision logic only assumes that the
/// amount weight dominates and that low confidence never auto-validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Weight of the amount signal (must be the largest)
    pub amount_weight: f64,

    /// Weight of the reference-similarity signal
    pub reference_weight: f64,

    /// Weight of the date-proximity signal
    pub date_weight: f64,

    /// Relative amount tolerance (0.01 = 1%)
    pub amount_tolerance: Decimal,

    /// Half-width of the due-date window in days
    pub date_window_days: i64,

    /// Minimum composite score to auto-validate
    pub validation_threshold: f64,

    /// Minimum composite score to surface a candidate for review
    pub review_threshold: f64,

    /// Minimum gap between best and second-best to avoid a tie
    pub separation_margin: f64,

    /// Minimum usable OCR confidence for amount and reference fields
    pub min_usable_confidence: f64,

    /// Reference similarity at or above which the match counts as exact
    pub reference_exact_floor: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            amount_weight: 3.0,
            reference_weight: 2.0,
            date_weight: 1.0,
            amount_tolerance: Decimal::new(1, 2), // 1%
            date_window_days: 45,
            validation_threshold: 0.80,
            review_threshold: 0.45,
            separation_margin: 0.10,
            min_usable_confidence: 0.60,
            reference_exact_floor: 0.97,
        }
    }
}

impl MatchingConfig {
    /// Validate weight dominance and threshold ordering
    pub fn validate(&self) -> crate::Result<()> {
        if self.amount_weight <= self.reference_weight
            || self.amount_weight <= self.date_weight
        {
            return Err(crate::Error::Config(
                "amount_weight must dominate reference_weight and date_weight".to_string(),
            ));
        }
        if self.review_threshold > self.validation_threshold {
            return Err(crate::Error::Config(
                "review_threshold must not exceed validation_threshold".to_string(),
            ));
        }
        if self.amount_tolerance < Decimal::ZERO {
            return Err(crate::Error::Config(
                "amount_tolerance must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Sum of signal weights, for normalisation
    pub fn weight_total(&self) -> f64 {
        self.amount_weight + self.reference_weight + self.date_weight
    }
}

/// Receipt generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptConfig {
    /// Issuer name printed on receipts
    pub issuer: String,

    /// Issuer locality printed on receipts
    pub location: String,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            issuer: "ProofRail".to_string(),
            location: "Tunis".to_string(),
        }
    }
}
