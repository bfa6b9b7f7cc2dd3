//! Error types for the recovery bank

use crate::types::StopId;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for recovery bank operations
pub type Result<T> = std::result::Result<T, Error>;

/// Recovery bank errors
///
/// Every variant is local to one request; none of them poisons the bank.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown stop referenced by a transfer
    #[error("Account not found: {0}")]
    AccountNotFound(StopId),

    /// Unknown transaction referenced by a rollback
    #[error("Transaction not found")]
    TransactionNotFound(Uuid),

    /// Lender cannot cover the amount
    #[error("Insufficient credit")]
    InsufficientCredit,

    /// Borrower debt would pass its recovery ceiling
    #[error("Borrower would exceed max recovery")]
    ExceedsMaxRecovery,

    /// Amount is above the configured trip deviation cap
    #[error("Amount exceeds max deviation")]
    ExceedsMaxDeviation,

    /// Lender is already stretched past the debt ratio cap
    #[error("Lender has high debt ratio")]
    HighDebtRatio,

    /// Lender and borrower are the same stop
    #[error("Cannot lend to self: {0}")]
    SelfLending(StopId),

    /// Transfer amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Commit would leave an account outside its limits
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Operation issued before `initialize_bank`
    #[error("Recovery bank not initialized")]
    NotInitialized,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the hard-constraint failures reported by the validator
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Error::InsufficientCredit
                | Error::ExceedsMaxRecovery
                | Error::ExceedsMaxDeviation
                | Error::HighDebtRatio
        )
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_messages() {
        assert_eq!(Error::InsufficientCredit.to_string(), "Insufficient credit");
        assert_eq!(
            Error::ExceedsMaxRecovery.to_string(),
            "Borrower would exceed max recovery"
        );
        assert_eq!(
            Error::TransactionNotFound(Uuid::nil()).to_string(),
            "Transaction not found"
        );
    }

    #[test]
    fn test_constraint_violation_kinds() {
        assert!(Error::HighDebtRatio.is_constraint_violation());
        assert!(!Error::NotInitialized.is_constraint_violation());
        assert!(!Error::AccountNotFound(StopId::new("A")).is_constraint_violation());
    }
}
