//! Hard-constraint checks run before any transfer is committed
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. Lender credit covers the amount
//! 2. Borrower debt stays within its recovery ceiling
//! 3. Amount stays within the configured trip deviation (if configured)
//! 4. Lender debt ratio is at most the cap (default 0.8)
//!
//! Every check is monotonic in the amount: a transfer that passes also
//! passes for any smaller amount against the same accounts.

use crate::types::{OptimizationConstraints, RecoveryAccount};
use crate::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Outcome of a validation, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    /// All checks passed
    pub is_valid: bool,
    /// Message of the first failing check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Transaction validator
#[derive(Debug, Clone, Default)]
pub struct TransactionValidator {
    constraints: Option<OptimizationConstraints>,
    max_lender_debt_ratio: f64,
}

impl TransactionValidator {
    /// Create validator with a lender debt-ratio cap
    pub fn new(constraints: Option<OptimizationConstraints>, max_lender_debt_ratio: f64) -> Self {
        Self {
            constraints,
            max_lender_debt_ratio,
        }
    }

    /// Constraints in force
    pub fn constraints(&self) -> Option<&OptimizationConstraints> {
        self.constraints.as_ref()
    }

    /// Debt ratio above which a lender is refused
    pub fn max_lender_debt_ratio(&self) -> f64 {
        self.max_lender_debt_ratio
    }

    /// Check a transfer against account snapshots
    pub fn check(
        &self,
        lender: &RecoveryAccount,
        borrower: &RecoveryAccount,
        amount: Decimal,
    ) -> Result<()> {
        if lender.available_credit < amount {
            return Err(Error::InsufficientCredit);
        }

        // A debt past Decimal range is past any ceiling
        let exceeds = borrower
            .current_debt
            .checked_add(amount)
            .map_or(true, |debt| debt > borrower.max_recovery_time);
        if exceeds {
            return Err(Error::ExceedsMaxRecovery);
        }

        if let Some(constraints) = &self.constraints {
            if amount > constraints.max_trip_deviation {
                return Err(Error::ExceedsMaxDeviation);
            }
        }

        let debt_ratio = lender.debt_ratio().to_f64().unwrap_or(f64::INFINITY);
        if debt_ratio > self.max_lender_debt_ratio {
            return Err(Error::HighDebtRatio);
        }

        Ok(())
    }

    /// Same checks, reported as a [`ValidationOutcome`]
    pub fn validate(
        &self,
        lender: &RecoveryAccount,
        borrower: &RecoveryAccount,
        amount: Decimal,
    ) -> ValidationOutcome {
        match self.check(lender, borrower, amount) {
            Ok(()) => ValidationOutcome {
                is_valid: true,
                error: None,
            },
            Err(e) => ValidationOutcome {
                is_valid: false,
                error: Some(e.to_string()),
            },
        }
    }
}
