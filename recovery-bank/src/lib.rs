//! Recovery Time Bank
//!
//! Treats the recovery (layover) minutes scheduled at each bus stop as a
//! bank account. Stops with slack lend minutes to stops that run short,
//! so a schedule optimizer can rebalance recovery time without adding
//! service hours.
//!
//! # Architecture
//!
//! - **Accounts**: Immutable per-stop records, replaced on every change
//! - **Ledger**: The only code path that moves balances; every commit is
//!   exactly reversible
//! - **Allocator**: Serves borrow requests in priority order against the
//!   best-scoring valid lender
//! - **Caches**: Bounded memoization of history, flexibility, transaction
//!   and allocation computations
//!
//! # Invariants
//!
//! - `0 <= available_credit <= max_credit` and
//!   `0 <= current_debt <= max_recovery_time` for every account
//! - Minutes conservation: Σ(credit) + Σ(debt) is constant across commits
//!   and rollbacks
//! - Commit then rollback restores the exact prior balances
//! - A stop never lends to itself

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod allocator;
pub mod bank;
pub mod batch;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod report;
pub mod scoring;
pub mod types;
pub mod validation;

// Re-exports
pub use bank::RecoveryBank;
pub use cache::{CacheStats, ScoreCaches};
pub use classifier::{infer_stop_type, recovery_limits};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use report::UtilizationReport;
pub use scoring::{DistancePenalty, IdentifierSimilarity, Scorer};
pub use types::{
    AccountOverride, AllocationRequest, AllocationResult, OptimizationConstraints,
    RecoveryAccount, RecoveryBankState, RecoveryLimits, RecoveryTransaction, Schedule,
    Session, StopConfigs, StopId, StopType, TimePoint, TransactionType, Trip, UnmetRequest,
};
pub use validation::{TransactionValidator, ValidationOutcome};
