//! Transaction ledger
//!
//! The ledger is the only code path that changes account balances.
//! Accounts are value records: a commit computes the new lender and
//! borrower records first and swaps both in only when both are within
//! limits, so a failed commit leaves the state untouched.
//!
//! # Invariants
//!
//! - Conservation: Σ(credit) + Σ(debt) is unchanged by commits and rollbacks
//! - Exact inverse: rollback reverses exactly the transaction's own amount,
//!   regardless of what other transactions did to the same accounts
//! - History order equals commit order

use crate::types::{RecoveryBankState, RecoveryTransaction};
use crate::{Error, Result};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

/// Append-only history of committed transfers (rollback removes entries)
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    history: Vec<RecoveryTransaction>,
}

impl Ledger {
    /// Create empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a validated transaction to `state`
    pub fn commit(
        &mut self,
        state: &mut RecoveryBankState,
        transaction: RecoveryTransaction,
    ) -> Result<()> {
        let lender = state
            .account(&transaction.lender_stop_id)
            .ok_or_else(|| Error::AccountNotFound(transaction.lender_stop_id.clone()))?;
        let borrower = state
            .account(&transaction.borrower_stop_id)
            .ok_or_else(|| Error::AccountNotFound(transaction.borrower_stop_id.clone()))?;

        if lender.available_credit.checked_sub(transaction.amount).is_none()
            || borrower.current_debt.checked_add(transaction.amount).is_none()
        {
            return Err(Error::InvariantViolation(format!(
                "amount {} overflows balances",
                transaction.amount
            )));
        }
        let lender = lender.lend(transaction.amount);
        let borrower = borrower.borrow(transaction.amount);

        if lender.available_credit < Decimal::ZERO {
            return Err(Error::InvariantViolation(format!(
                "{} credit would drop to {}",
                lender.stop_id, lender.available_credit
            )));
        }
        if borrower.current_debt > borrower.max_recovery_time {
            return Err(Error::InvariantViolation(format!(
                "{} debt would reach {} above ceiling {}",
                borrower.stop_id, borrower.current_debt, borrower.max_recovery_time
            )));
        }

        let total_borrowed = state
            .total_borrowed_recovery
            .checked_add(transaction.amount)
            .ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "borrowed total overflows adding {}",
                    transaction.amount
                ))
            })?;

        state.accounts.insert(lender.stop_id.clone(), lender);
        state.accounts.insert(borrower.stop_id.clone(), borrower);
        state.total_borrowed_recovery = total_borrowed;
        state.recompute_utilization();
        state.touch();

        debug!(
            transaction_id = %transaction.id,
            lender = %transaction.lender_stop_id,
            borrower = %transaction.borrower_stop_id,
            amount = %transaction.amount,
            "Transaction committed"
        );

        state.transactions.push(transaction.clone());
        self.history.push(transaction);
        Ok(())
    }

    /// Reverse a committed transaction and drop it from history
    pub fn rollback(
        &mut self,
        state: &mut RecoveryBankState,
        transaction_id: Uuid,
    ) -> Result<RecoveryTransaction> {
        let position = state
            .transactions
            .iter()
            .position(|t| t.id == transaction_id)
            .ok_or(Error::TransactionNotFound(transaction_id))?;
        let transaction = &state.transactions[position];

        let lender = state
            .account(&transaction.lender_stop_id)
            .ok_or_else(|| Error::AccountNotFound(transaction.lender_stop_id.clone()))?
            .repay_loan(transaction.amount);
        let borrower = state
            .account(&transaction.borrower_stop_id)
            .ok_or_else(|| Error::AccountNotFound(transaction.borrower_stop_id.clone()))?
            .settle_debt(transaction.amount);

        state.accounts.insert(lender.stop_id.clone(), lender);
        state.accounts.insert(borrower.stop_id.clone(), borrower);

        let transaction = state.transactions.remove(position);
        self.history.retain(|t| t.id != transaction_id);

        state.total_borrowed_recovery -= transaction.amount;
        state.recompute_utilization();
        state.touch();

        debug!(transaction_id = %transaction.id, amount = %transaction.amount, "Transaction rolled back");
        Ok(transaction)
    }

    /// Roll back every committed transaction, newest first
    pub fn rollback_all(&mut self, state: &mut RecoveryBankState) -> Result<usize> {
        let ids: Vec<Uuid> = state.transactions.iter().rev().map(|t| t.id).collect();
        for id in &ids {
            self.rollback(state, *id)?;
        }

        if !ids.is_empty() {
            info!(count = ids.len(), "Rolled back all transactions");
        }
        Ok(ids.len())
    }

    /// Committed transactions in commit order
    pub fn history(&self) -> &[RecoveryTransaction] {
        &self.history
    }

    /// Forget history without touching balances (new session)
    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecoveryAccount, StopId, StopType, TransactionType};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn account(id: &str, credit: i64, max_recovery: i64) -> RecoveryAccount {
        RecoveryAccount {
            stop_id: StopId::new(id),
            stop_name: id.to_string(),
            stop_type: StopType::Regular,
            available_credit: Decimal::from(credit),
            current_debt: Decimal::ZERO,
            max_credit: Decimal::from(8),
            min_recovery_time: Decimal::ZERO,
            max_recovery_time: Decimal::from(max_recovery),
            flexibility_score: 0.6,
        }
    }

    fn state() -> RecoveryBankState {
        let mut accounts = BTreeMap::new();
        accounts.insert(StopId::new("A"), account("A", 8, 15));
        accounts.insert(StopId::new("B"), account("B", 0, 4));
        accounts.insert(StopId::new("C"), account("C", 3, 6));
        RecoveryBankState::new(accounts)
    }

    fn transaction(from: &str, to: &str, amount: Decimal) -> RecoveryTransaction {
        RecoveryTransaction {
            id: Uuid::now_v7(),
            lender_stop_id: StopId::new(from),
            borrower_stop_id: StopId::new(to),
            amount,
            affected_trips: vec!["trip1".to_string()],
            score: 0.5,
            transaction_type: TransactionType::Borrow,
            reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_moves_minutes() {
        let mut ledger = Ledger::new();
        let mut state = state();
        let before = state.total_balance();

        ledger
            .commit(&mut state, transaction("A", "B", Decimal::from(3)))
            .unwrap();

        assert_eq!(state.accounts[&StopId::new("A")].available_credit, Decimal::from(5));
        assert_eq!(state.accounts[&StopId::new("B")].current_debt, Decimal::from(3));
        assert_eq!(state.total_borrowed_recovery, Decimal::from(3));
        assert_eq!(state.total_balance(), before);
        assert_eq!(state.transactions.len(), 1);
        assert_eq!(ledger.history().len(), 1);
        // 3 / 11 available at session start
        assert!((state.utilization_rate - 3.0 / 11.0).abs() < 1e-12);
    }

    #[test]
    fn test_commit_rejects_invariant_breach() {
        let mut ledger = Ledger::new();
        let mut state = state();
        let snapshot = state.clone();

        let result = ledger.commit(&mut state, transaction("A", "B", Decimal::from(5)));
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        assert_eq!(state.accounts, snapshot.accounts);
        assert!(ledger.history().is_empty());
    }

    #[test]
    fn test_commit_rejects_overflowing_amount() {
        let mut ledger = Ledger::new();
        let mut state = state();
        let indebted = state.accounts[&StopId::new("C")].borrow(Decimal::ONE);
        state.accounts.insert(StopId::new("C"), indebted);
        let snapshot = state.clone();

        // 1 + MAX does not fit a Decimal
        let result = ledger.commit(&mut state, transaction("A", "C", Decimal::MAX));
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        assert_eq!(state.accounts, snapshot.accounts);
        assert_eq!(state.version, snapshot.version);
    }

    #[test]
    fn test_commit_and_rollback_renew_version() {
        let mut ledger = Ledger::new();
        let mut state = state();
        let initial = state.version;

        let tx = transaction("A", "B", Decimal::ONE);
        let id = tx.id;
        ledger.commit(&mut state, tx).unwrap();
        let committed = state.version;
        assert_ne!(committed, initial);

        ledger.rollback(&mut state, id).unwrap();
        assert_ne!(state.version, committed);
        assert_ne!(state.version, initial);
    }

    #[test]
    fn test_rollback_is_exact_inverse() {
        let mut ledger = Ledger::new();
        let mut state = state();
        let snapshot = state.clone();

        let tx = transaction("A", "B", Decimal::new(25, 1));
        let id = tx.id;
        ledger.commit(&mut state, tx).unwrap();
        let reverted = ledger.rollback(&mut state, id).unwrap();

        assert_eq!(reverted.id, id);
        assert_eq!(state.accounts, snapshot.accounts);
        assert_eq!(state.total_borrowed_recovery, Decimal::ZERO);
        assert!(state.transactions.is_empty());
        assert!(ledger.history().is_empty());
    }

    #[test]
    fn test_rollback_superposition() {
        let mut ledger = Ledger::new();
        let mut state = state();

        let first = transaction("A", "B", Decimal::from(2));
        let first_id = first.id;
        ledger.commit(&mut state, first).unwrap();
        ledger
            .commit(&mut state, transaction("C", "B", Decimal::ONE))
            .unwrap();

        ledger.rollback(&mut state, first_id).unwrap();

        assert_eq!(state.accounts[&StopId::new("A")].available_credit, Decimal::from(8));
        assert_eq!(state.accounts[&StopId::new("B")].current_debt, Decimal::ONE);
        assert_eq!(state.accounts[&StopId::new("C")].available_credit, Decimal::from(2));
        assert_eq!(ledger.history().len(), 1);
    }

    #[test]
    fn test_rollback_unknown() {
        let mut ledger = Ledger::new();
        let mut state = state();
        let snapshot = state.clone();

        let result = ledger.rollback(&mut state, Uuid::now_v7());
        assert!(matches!(result, Err(Error::TransactionNotFound(_))));
        assert_eq!(state.accounts, snapshot.accounts);
    }

    #[test]
    fn test_rollback_all() {
        let mut ledger = Ledger::new();
        let mut state = state();
        let snapshot = state.clone();

        ledger
            .commit(&mut state, transaction("A", "B", Decimal::from(2)))
            .unwrap();
        ledger
            .commit(&mut state, transaction("A", "C", Decimal::from(4)))
            .unwrap();

        assert_eq!(ledger.rollback_all(&mut state).unwrap(), 2);
        assert_eq!(state.accounts, snapshot.accounts);
        assert!(ledger.history().is_empty());
    }
}
