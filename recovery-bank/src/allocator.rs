//! Lender search for priority-ordered borrow requests
//!
//! # Algorithm
//!
//! 1. Requests are stably sorted by priority, highest first; equal
//!    priorities keep their submission order.
//! 2. A request naming a lender (other than the borrower itself) tries that
//!    pair first. If the pair fails validation the search falls back to
//!    every other account.
//! 3. The search keeps lenders that pass validation and picks the one with
//!    the highest `score * priority / 10`. Ties keep the first lender in
//!    route order.
//!
//! Results are memoized per request and bank-state version, so a
//! repeated search against unchanged balances skips the scan.

use crate::cache::{AllocationKey, LenderChoice};
use crate::scoring::Scorer;
use crate::types::{AllocationRequest, RecoveryBankState};
use crate::validation::TransactionValidator;
use tracing::debug;

/// Sort requests by priority descending, preserving order among equals
pub fn sort_by_priority(mut requests: Vec<AllocationRequest>) -> Vec<AllocationRequest> {
    requests.sort_by(|a, b| b.priority.cmp(&a.priority));
    requests
}

/// Best-lender search over one bank state
#[derive(Debug)]
pub struct LenderSearch<'a> {
    validator: &'a TransactionValidator,
    scorer: &'a Scorer,
}

impl<'a> LenderSearch<'a> {
    /// Create search
    pub fn new(validator: &'a TransactionValidator, scorer: &'a Scorer) -> Self {
        Self { validator, scorer }
    }

    /// Best lender for `request` against `state`, memoized
    pub fn best_lender(
        &self,
        state: &RecoveryBankState,
        request: &AllocationRequest,
    ) -> Option<LenderChoice> {
        let key = AllocationKey {
            to_stop_id: request.to_stop_id.clone(),
            from_stop_id: request.from_stop_id.clone(),
            amount: request.amount,
            priority: request.priority,
            state_version: state.version,
            constraints: self.validator.constraints().copied(),
            max_lender_debt_ratio: self.validator.max_lender_debt_ratio().to_bits(),
            penalty_basis: self.scorer.penalty_basis().to_string(),
            max_variance_samples: self.scorer.max_variance_samples(),
        };

        self.scorer
            .caches()
            .allocation
            .get_or_insert_with(key, || self.search(state, request))
    }

    /// Uncached search
    pub fn search(
        &self,
        state: &RecoveryBankState,
        request: &AllocationRequest,
    ) -> Option<LenderChoice> {
        let borrower = state.account(&request.to_stop_id)?;

        if let Some(from) = &request.from_stop_id {
            if from != &request.to_stop_id {
                if let Some(lender) = state.account(from) {
                    if self.validator.check(lender, borrower, request.amount).is_ok() {
                        return Some(LenderChoice {
                            lender: from.clone(),
                            score: self.scorer.transaction_score(lender, borrower, request.amount),
                        });
                    }
                }
                debug!(
                    requested = %from,
                    borrower = %request.to_stop_id,
                    "Requested lender unavailable, searching alternatives"
                );
            }
        }

        let weight = f64::from(request.priority) / 10.0;
        let mut best: Option<(LenderChoice, f64)> = None;

        for lender in state.accounts_in_order() {
            let stop_id = &lender.stop_id;
            if stop_id == &request.to_stop_id {
                continue;
            }
            if self.validator.check(lender, borrower, request.amount).is_err() {
                continue;
            }

            let score = self.scorer.transaction_score(lender, borrower, request.amount);
            let weighted = score * weight;
            if best.as_ref().map_or(true, |(_, top)| weighted > *top) {
                best = Some((
                    LenderChoice {
                        lender: stop_id.clone(),
                        score,
                    },
                    weighted,
                ));
            }
        }

        best.map(|(choice, _)| choice)
    }
}
