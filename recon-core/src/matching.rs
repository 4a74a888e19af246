//! Matching engine
//!
//! Scores extracted proof data against candidate invoices and decides
//! validate / ambiguous / no-match. Pure and total: the engine never
//! fails on valid input and never mutates its inputs, so runs for
//! different submissions share nothing.
//!
//! Three weighted signals feed a composite score:
//! - amount vs. outstanding balance (exact or within relative tolerance)
//! - normalized reference similarity (Levenshtein)
//! - payment-date proximity to the due date (linear decay)
//!
//! The amount weight dominates, and a candidate whose amount signal is
//! zero can never validate. Low OCR confidence on the amount or the
//! reference downgrades a would-be validation to ambiguous.

use crate::config::MatchingConfig;
use crate::types::{
    ExtractedProofData, InvoiceSnapshot, MatchOutcome, MatchingResult, ReasonCode, ScoredCandidate,
};
use rust_decimal::Decimal;
use std::cmp::Ordering;

// Similarity floor for labelling a reference match as fuzzy in reasons.
const REFERENCE_FUZZY_FLOOR: f64 = 0.5;

/// Invoice matching engine
#[derive(Debug, Clone)]
pub struct MatchingEngine {
    config: MatchingConfig,
}

impl MatchingEngine {
    /// Create engine with the given configuration
    pub fn new(config: MatchingConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Engine configuration
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Match extracted proof data against candidate invoices
    ///
    /// Candidates should be pre-filtered to matchable statuses; anything
    /// else is filtered out here defensively. An empty candidate set is
    /// a NoMatch, never an error.
    pub fn match_proof(
        &self,
        data: &ExtractedProofData,
        candidates: &[InvoiceSnapshot],
    ) -> MatchingResult {
        let eligible: Vec<&InvoiceSnapshot> =
            candidates.iter().filter(|c| c.is_matchable()).collect();
        if eligible.is_empty() {
            tracing::warn!("Matching invoked with no eligible candidates");
            return MatchingResult::no_match(vec![ReasonCode::NoEligibleCandidates]);
        }

        let mut scored: Vec<ScoredCandidate> = eligible
            .iter()
            .map(|invoice| self.score_candidate(data, invoice))
            .collect();

        // Deterministic order: score descending, invoice id ascending.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.invoice_id.cmp(&b.invoice_id))
        });

        let top = scored[0].clone();
        let margin_met = match scored.get(1) {
            Some(second) => top.score - second.score >= self.config.separation_margin,
            None => true,
        };
        let shortlist: Vec<ScoredCandidate> = scored
            .iter()
            .filter(|c| c.score >= self.config.review_threshold)
            .cloned()
            .collect();

        let mut reasons = self.signal_reasons(&top);

        let meets_validation = top.score >= self.config.validation_threshold;
        let amount_backed = top.amount_signal > 0.0;
        let confidence_ok = data.confidence.amount >= self.config.min_usable_confidence
            && data.confidence.reference >= self.config.min_usable_confidence;

        if meets_validation && amount_backed && margin_met {
            if !confidence_ok {
                // Untrusted OCR output must never auto-validate a payment.
                reasons.push(ReasonCode::LowExtractionConfidence);
                return MatchingResult {
                    outcome: MatchOutcome::Ambiguous,
                    invoice_id: Some(top.invoice_id.clone()),
                    score: top.score,
                    reasons,
                    candidates: shortlist,
                };
            }
            tracing::info!(
                invoice_id = %top.invoice_id,
                score = top.score,
                "Proof validated against invoice"
            );
            return MatchingResult {
                outcome: MatchOutcome::Validated,
                invoice_id: Some(top.invoice_id.clone()),
                score: top.score,
                reasons,
                candidates: vec![top],
            };
        }

        if top.score >= self.config.review_threshold {
            if !margin_met {
                reasons.push(ReasonCode::MultipleCandidatesTied);
            }
            return MatchingResult {
                outcome: MatchOutcome::Ambiguous,
                invoice_id: Some(top.invoice_id.clone()),
                score: top.score,
                reasons,
                candidates: shortlist,
            };
        }

        MatchingResult {
            outcome: MatchOutcome::NoMatch,
            invoice_id: None,
            score: top.score,
            reasons: Vec::new(),
            candidates: Vec::new(),
        }
    }

    fn score_candidate(
        &self,
        data: &ExtractedProofData,
        invoice: &InvoiceSnapshot,
    ) -> ScoredCandidate {
        let amount_signal = self.amount_signal(data, invoice);
        let reference_signal = self.reference_signal(data, invoice);
        let date_signal = self.date_signal(data, invoice);

        let score = (self.config.amount_weight * amount_signal
            + self.config.reference_weight * reference_signal
            + self.config.date_weight * date_signal)
            / self.config.weight_total();

        ScoredCandidate {
            invoice_id: invoice.invoice_id.clone(),
            score,
            amount_signal,
            reference_signal,
            date_signal,
        }
    }

    // Exact = 1.0, within relative tolerance = 0.7, otherwise 0.0.
    // Partially paid invoices are compared against the remaining balance.
    fn amount_signal(&self, data: &ExtractedProofData, invoice: &InvoiceSnapshot) -> f64 {
        let Some(paid) = data.amount else {
            return 0.0;
        };
        let due = invoice.remaining_due();
        let Some(diff) = paid.abs_diff(due) else {
            // Currency mismatch
            return 0.0;
        };
        if diff == 0 {
            return 1.0;
        }
        let allowance = self.config.amount_tolerance * Decimal::from(due.minor_units.abs());
        if Decimal::from(diff) <= allowance {
            0.7
        } else {
            0.0
        }
    }

    fn reference_signal(&self, data: &ExtractedProofData, invoice: &InvoiceSnapshot) -> f64 {
        let Some(extracted) = data.reference.as_deref() else {
            return 0.0;
        };
        normalized_similarity(extracted, &invoice.reference)
    }

    fn date_signal(&self, data: &ExtractedProofData, invoice: &InvoiceSnapshot) -> f64 {
        let Some(date) = data.payment_date else {
            return 0.0;
        };
        let days = (date - invoice.due_date).num_days().abs();
        let window = self.config.date_window_days.max(1);
        if days >= window {
            0.0
        } else {
            1.0 - days as f64 / window as f64
        }
    }

    fn signal_reasons(&self, top: &ScoredCandidate) -> Vec<ReasonCode> {
        let mut reasons = Vec::new();
        if top.amount_signal >= 1.0 {
            reasons.push(ReasonCode::AmountExact);
        } else if top.amount_signal > 0.0 {
            reasons.push(ReasonCode::AmountWithinTolerance);
        }
        if top.reference_signal >= self.config.reference_exact_floor {
            reasons.push(ReasonCode::ReferenceExactMatch);
        } else if top.reference_signal >= REFERENCE_FUZZY_FLOOR {
            reasons.push(ReasonCode::ReferenceFuzzyMatch);
        }
        if top.date_signal > 0.0 {
            reasons.push(ReasonCode::DateWithinWindow);
        }
        reasons
    }
}

/// Similarity of two strings after normalization, in [0, 1]
///
/// Case-insensitive, whitespace- and punctuation-insensitive.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_reference(a);
    let b = normalize_reference(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let distance = levenshtein_distance(&a, &b);
    let max_len = a.chars().count().max(b.chars().count());
    1.0 - distance as f64 / max_len as f64
}

// Lowercase, keep alphanumerics only.
fn normalize_reference(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
