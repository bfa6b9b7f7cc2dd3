//! Utilization reporting

use crate::types::{RecoveryBankState, StopId, StopType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Number of lenders/borrowers listed in a report
pub const TOP_N: usize = 5;

/// Per-account detail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountUtilization {
    /// Stop
    pub stop_id: StopId,
    /// Stop name
    pub stop_name: String,
    /// Category
    pub stop_type: StopType,
    /// Current credit
    pub available_credit: Decimal,
    /// Current debt
    pub current_debt: Decimal,
    /// Credit ceiling
    pub max_credit: Decimal,
    /// Debt ceiling
    pub max_recovery_time: Decimal,
    /// Flexibility
    pub flexibility_score: f64,
    /// Minutes lent in committed transactions
    pub lent: Decimal,
    /// Minutes borrowed in committed transactions
    pub borrowed: Decimal,
}

/// Volume ranking entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeEntry {
    /// Stop
    pub stop_id: StopId,
    /// Stop name
    pub stop_name: String,
    /// Minutes moved
    pub volume: Decimal,
    /// Transactions involved
    pub transaction_count: usize,
}

/// Bank-wide utilization report
#[derive(Debug, Clone, Serialize)]
pub struct UtilizationReport {
    /// Lendable pool at session start
    pub total_available_recovery: Decimal,
    /// Minutes currently on loan
    pub total_borrowed_recovery: Decimal,
    /// borrowed / available
    pub utilization_rate: f64,
    /// Committed transactions
    pub transaction_count: usize,
    /// Every account, in stop order
    pub accounts: Vec<AccountUtilization>,
    /// Largest lenders by volume
    pub top_lenders: Vec<VolumeEntry>,
    /// Largest borrowers by volume
    pub top_borrowers: Vec<VolumeEntry>,
    /// Report timestamp
    pub generated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Volume {
    amount: Decimal,
    count: usize,
}

/// Build a report from the current state
pub fn generate(state: &RecoveryBankState) -> UtilizationReport {
    let mut lent: BTreeMap<&StopId, Volume> = BTreeMap::new();
    let mut borrowed: BTreeMap<&StopId, Volume> = BTreeMap::new();

    for tx in &state.transactions {
        let entry = lent.entry(&tx.lender_stop_id).or_default();
        entry.amount = entry.amount.saturating_add(tx.amount);
        entry.count += 1;

        let entry = borrowed.entry(&tx.borrower_stop_id).or_default();
        entry.amount = entry.amount.saturating_add(tx.amount);
        entry.count += 1;
    }

    let accounts = state
        .accounts_in_order()
        .map(|a| AccountUtilization {
            stop_id: a.stop_id.clone(),
            stop_name: a.stop_name.clone(),
            stop_type: a.stop_type,
            available_credit: a.available_credit,
            current_debt: a.current_debt,
            max_credit: a.max_credit,
            max_recovery_time: a.max_recovery_time,
            flexibility_score: a.flexibility_score,
            lent: lent.get(&a.stop_id).map_or(Decimal::ZERO, |v| v.amount),
            borrowed: borrowed.get(&a.stop_id).map_or(Decimal::ZERO, |v| v.amount),
        })
        .collect();

    UtilizationReport {
        total_available_recovery: state.total_available_recovery,
        total_borrowed_recovery: state.total_borrowed_recovery,
        utilization_rate: state.utilization_rate,
        transaction_count: state.transactions.len(),
        accounts,
        top_lenders: top_by_volume(state, &lent),
        top_borrowers: top_by_volume(state, &borrowed),
        generated_at: Utc::now(),
    }
}

fn top_by_volume(state: &RecoveryBankState, volumes: &BTreeMap<&StopId, Volume>) -> Vec<VolumeEntry> {
    let mut entries: Vec<VolumeEntry> = state
        .accounts_in_order()
        .filter_map(|account| {
            volumes.get(&account.stop_id).map(|volume| VolumeEntry {
                stop_id: account.stop_id.clone(),
                stop_name: account.stop_name.clone(),
                volume: volume.amount,
                transaction_count: volume.count,
            })
        })
        .collect();

    // Stable sort keeps route order among equal volumes
    entries.sort_by(|a, b| b.volume.cmp(&a.volume));
    entries.truncate(TOP_N);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecoveryAccount, RecoveryTransaction, TransactionType};
    use uuid::Uuid;

    fn account(id: &str) -> RecoveryAccount {
        RecoveryAccount {
            stop_id: StopId::new(id),
            stop_name: format!("Stop {}", id),
            stop_type: StopType::Regular,
            available_credit: Decimal::from(3),
            current_debt: Decimal::ZERO,
            max_credit: Decimal::from(3),
            min_recovery_time: Decimal::ZERO,
            max_recovery_time: Decimal::from(6),
            flexibility_score: 0.6,
        }
    }

    fn tx(from: &str, to: &str, amount: i64) -> RecoveryTransaction {
        RecoveryTransaction {
            id: Uuid::now_v7(),
            lender_stop_id: StopId::new(from),
            borrower_stop_id: StopId::new(to),
            amount: Decimal::from(amount),
            affected_trips: vec![],
            score: 0.5,
            transaction_type: TransactionType::Borrow,
            reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_report_rankings() {
        let ids = ["A", "B", "C", "D", "E", "F", "G"];
        let accounts = ids
            .iter()
            .map(|id| (StopId::new(*id), account(id)))
            .collect();
        let mut state = RecoveryBankState::new(accounts);
        state.transactions = vec![
            tx("A", "G", 1),
            tx("B", "G", 2),
            tx("C", "F", 3),
            tx("D", "F", 1),
            tx("E", "F", 1),
            tx("A", "F", 2),
        ];

        let report = generate(&state);
        assert_eq!(report.transaction_count, 6);
        assert_eq!(report.accounts.len(), 7);

        let lenders: Vec<&str> = report.top_lenders.iter().map(|e| e.stop_id.as_str()).collect();
        assert_eq!(lenders, vec!["A", "C", "B", "D", "E"]);
        assert_eq!(report.top_lenders[0].volume, Decimal::from(3));
        assert_eq!(report.top_lenders[0].transaction_count, 2);

        assert_eq!(report.top_borrowers.len(), 2);
        assert_eq!(report.top_borrowers[0].stop_id, StopId::new("F"));
        assert_eq!(report.top_borrowers[0].volume, Decimal::from(7));

        let g = report.accounts.iter().find(|a| a.stop_id.as_str() == "G").unwrap();
        assert_eq!(g.borrowed, Decimal::from(3));
        assert_eq!(g.lent, Decimal::ZERO);
    }

    #[test]
    fn test_report_follows_route_order() {
        let state = {
            let mut state = RecoveryBankState::from_route(vec![
                account("S2"),
                account("S10"),
                account("S1"),
            ]);
            state.transactions = vec![tx("S10", "S1", 1), tx("S2", "S1", 1)];
            state
        };

        let report = generate(&state);
        let order: Vec<&str> = report.accounts.iter().map(|a| a.stop_id.as_str()).collect();
        assert_eq!(order, vec!["S2", "S10", "S1"]);

        let lenders: Vec<&str> = report.top_lenders.iter().map(|e| e.stop_id.as_str()).collect();
        assert_eq!(lenders, vec!["S2", "S10"]);
    }

    #[test]
    fn test_empty_report() {
        let state = RecoveryBankState::new(BTreeMap::new());
        let report = generate(&state);
        assert_eq!(report.utilization_rate, 0.0);
        assert!(report.top_lenders.is_empty());
        assert!(report.accounts.is_empty());
    }
}
