//! Flexibility and transaction scoring
//!
//! # Flexibility
//!
//! A stop starts from a base score for its category. With two or more
//! historical samples, the population variance of its recovery minutes
//! (divided by their mean, capped at 1) is blended in as
//! `(base + variance_score) / 2`.
//!
//! # Transaction desirability
//!
//! ```text
//! 0.3 * lender_flexibility
//! + 0.3 * (1 - borrower_flexibility)
//! + 0.2 * min(amount / 5, 1)
//! + 0.1 * (1 - lender_utilization)
//! + 0.1 * (1 - borrower_utilization)
//! ```
//!
//! multiplied by a distance penalty in `[0.8, 1.0]`.

use crate::cache::{FlexibilityKey, ScoreCaches, TransactionScoreKey};
use crate::config::ScoringConfig;
use crate::types::{RecoveryAccount, StopId, StopType};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// Lowest distance multiplier
pub const MIN_DISTANCE_PENALTY: f64 = 0.8;

/// Amount (minutes) at which the amount term saturates
const AMOUNT_SATURATION: f64 = 5.0;

/// Multiplier applied to a transaction score based on how far apart two stops are
///
/// Cached scores are keyed by [`basis_id`](DistancePenalty::basis_id), so
/// two implementations that can disagree must report different ids.
pub trait DistancePenalty: Send + Sync + fmt::Debug {
    /// Multiplier in `[0.8, 1.0]`; exactly 1.0 for the same stop
    fn penalty(&self, lender: &StopId, borrower: &StopId) -> f64;

    /// Identity of the distance data behind `penalty`
    fn basis_id(&self) -> &str;
}

/// Distance proxy from the shared prefix of two stop identifiers
///
/// Stops numbered along the same corridor tend to share id prefixes.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentifierSimilarity;

impl DistancePenalty for IdentifierSimilarity {
    fn basis_id(&self) -> &str {
        "identifier_similarity"
    }

    fn penalty(&self, lender: &StopId, borrower: &StopId) -> f64 {
        if lender == borrower {
            return 1.0;
        }

        let a = lender.as_str();
        let b = borrower.as_str();
        let max_len = a.chars().count().max(b.chars().count());
        if max_len == 0 {
            return 1.0;
        }

        let common = a
            .chars()
            .zip(b.chars())
            .take_while(|(x, y)| x == y)
            .count();
        let similarity = common as f64 / max_len as f64;

        (MIN_DISTANCE_PENALTY + (1.0 - MIN_DISTANCE_PENALTY) * similarity)
            .clamp(MIN_DISTANCE_PENALTY, 1.0)
    }
}

/// Base flexibility per category
pub fn base_flexibility(stop_type: StopType) -> f64 {
    match stop_type {
        StopType::Terminal => 0.9,
        StopType::Mall => 0.8,
        StopType::MajorStop => 0.7,
        StopType::Regular => 0.6,
        StopType::Hospital => 0.4,
        StopType::School => 0.2,
    }
}

/// Every k-th sample so that at most `max_samples` remain
pub fn stride_sample(samples: &[Decimal], max_samples: usize) -> Vec<f64> {
    let max_samples = max_samples.max(1);
    let stride = if samples.len() > max_samples {
        (samples.len() + max_samples - 1) / max_samples
    } else {
        1
    };

    samples
        .iter()
        .step_by(stride)
        .map(|s| s.to_f64().unwrap_or(0.0))
        .collect()
}

/// Uncached flexibility score
pub fn compute_flexibility_score(
    stop_type: StopType,
    recovery_times: &[Decimal],
    max_samples: usize,
) -> f64 {
    let base = base_flexibility(stop_type);

    if recovery_times.len() < 2 {
        return base.clamp(0.0, 1.0);
    }

    let sampled = stride_sample(recovery_times, max_samples);
    let n = sampled.len() as f64;
    let mean = sampled.iter().sum::<f64>() / n;
    let variance = sampled.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    let variance_score = if mean > 0.0 {
        (variance / mean).min(1.0)
    } else {
        0.0
    };

    ((base + variance_score) / 2.0).clamp(0.0, 1.0)
}

/// Uncached transaction score
pub fn compute_transaction_score(
    lender: &RecoveryAccount,
    borrower: &RecoveryAccount,
    amount: Decimal,
    distance_penalty: f64,
) -> f64 {
    let amount_term = (amount.to_f64().unwrap_or(0.0) / AMOUNT_SATURATION).clamp(0.0, 1.0);

    let raw = 0.3 * lender.flexibility_score
        + 0.3 * (1.0 - borrower.flexibility_score)
        + 0.2 * amount_term
        + 0.1 * (1.0 - lender.lender_utilization())
        + 0.1 * (1.0 - borrower.borrower_utilization());

    (raw * distance_penalty).clamp(0.0, 1.0)
}

/// Memoizing scorer
#[derive(Debug, Clone)]
pub struct Scorer {
    caches: Arc<ScoreCaches>,
    distance: Arc<dyn DistancePenalty>,
    max_variance_samples: usize,
}

impl Scorer {
    /// Create a scorer using the identifier-similarity distance proxy
    pub fn new(caches: Arc<ScoreCaches>, config: &ScoringConfig) -> Self {
        Self {
            caches,
            distance: Arc::new(IdentifierSimilarity),
            max_variance_samples: config.max_variance_samples,
        }
    }

    /// Swap the distance penalty basis (e.g. real geographic distance)
    pub fn with_distance_penalty(mut self, distance: Arc<dyn DistancePenalty>) -> Self {
        self.distance = distance;
        self
    }

    /// Caches backing this scorer
    pub fn caches(&self) -> &Arc<ScoreCaches> {
        &self.caches
    }

    /// Identity of the distance penalty in use
    pub fn penalty_basis(&self) -> &str {
        self.distance.basis_id()
    }

    /// Variance sample cap
    pub fn max_variance_samples(&self) -> usize {
        self.max_variance_samples
    }

    /// Flexibility score for a category and its historical samples
    pub fn flexibility_score(&self, stop_type: StopType, recovery_times: &[Decimal]) -> f64 {
        let key = FlexibilityKey {
            stop_type,
            sample_count: recovery_times.len(),
            samples: recovery_times.to_vec(),
            max_samples: self.max_variance_samples,
        };

        self.caches.flexibility.get_or_insert_with(key, || {
            compute_flexibility_score(stop_type, recovery_times, self.max_variance_samples)
        })
    }

    /// Desirability of `lender` lending `amount` to `borrower`
    pub fn transaction_score(
        &self,
        lender: &RecoveryAccount,
        borrower: &RecoveryAccount,
        amount: Decimal,
    ) -> f64 {
        let key = TransactionScoreKey {
            lender: lender.stop_id.clone(),
            borrower: borrower.stop_id.clone(),
            amount,
            lender_debt: lender.current_debt,
            borrower_debt: borrower.current_debt,
            lender_max_credit: lender.max_credit,
            borrower_max_recovery: borrower.max_recovery_time,
            lender_flexibility: lender.flexibility_score.to_bits(),
            borrower_flexibility: borrower.flexibility_score.to_bits(),
            penalty_basis: self.penalty_basis().to_string(),
        };

        self.caches.transaction.get_or_insert_with(key, || {
            let penalty = self.distance.penalty(&lender.stop_id, &borrower.stop_id);
            compute_transaction_score(lender, borrower, amount, penalty)
        })
    }
}
