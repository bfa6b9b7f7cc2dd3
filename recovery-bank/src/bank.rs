//! Recovery bank engine
//!
//! One `RecoveryBank` per optimization session. The bank owns its state
//! and ledger; callers drive it one request at a time.
//!
//! # Example
//!
//! ```no_run
//! use recovery_bank::{Config, RecoveryBank, Schedule, StopConfigs};
//!
//! fn main() -> recovery_bank::Result<()> {
//!     let mut bank = RecoveryBank::new(Config::default())?;
//!     let schedule = Schedule::default();
//!     bank.initialize_bank(&schedule, &StopConfigs::new(), None);
//!
//!     let report = bank.generate_utilization_report()?;
//!     println!("utilization {:.1}%", report.utilization_rate * 100.0);
//!     Ok(())
//! }
//! ```

use crate::allocator::{sort_by_priority, LenderSearch};
use crate::batch::process_in_chunks;
use crate::cache::{CacheStats, ScoreCaches};
use crate::classifier::{infer_stop_type, recovery_limits};
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::report::{self, UtilizationReport};
use crate::scoring::{DistancePenalty, Scorer};
use crate::types::{
    AccountOverride, AllocationRequest, AllocationResult, OptimizationConstraints,
    RecoveryAccount, RecoveryBankState, RecoveryTransaction, Schedule, StopConfigs, StopId,
    TimePoint, TransactionType, UnmetRequest,
};
use crate::validation::{TransactionValidator, ValidationOutcome};
use crate::{Config, Error, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reason recorded for requests with no eligible lender
const NO_LENDER: &str = "No eligible lender";

/// Recovery time bank for one optimization session
pub struct RecoveryBank {
    config: Config,
    state: Option<RecoveryBankState>,
    ledger: Ledger,
    validator: TransactionValidator,
    scorer: Scorer,
    metrics: Metrics,
    evictions_seen: u64,
}

impl std::fmt::Debug for RecoveryBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryBank")
            .field("service_name", &self.config.service_name)
            .field("initialized", &self.state.is_some())
            .field("transactions", &self.ledger.history().len())
            .finish()
    }
}

impl RecoveryBank {
    /// Create a bank with its own caches
    pub fn new(config: Config) -> Result<Self> {
        let caches = Arc::new(ScoreCaches::new(&config.cache));
        Self::with_caches(config, caches)
    }

    /// Create a bank sharing caches with other sessions
    pub fn with_caches(config: Config, caches: Arc<ScoreCaches>) -> Result<Self> {
        config.validate()?;
        let scorer = Scorer::new(caches, &config.scoring);
        let validator = TransactionValidator::new(None, config.scoring.max_lender_debt_ratio);

        Ok(Self {
            config,
            state: None,
            ledger: Ledger::new(),
            validator,
            scorer,
            metrics: Metrics::new()?,
            evictions_seen: 0,
        })
    }

    /// Swap the distance penalty used by transaction scoring
    pub fn with_distance_penalty(mut self, distance: Arc<dyn DistancePenalty>) -> Self {
        self.scorer = self.scorer.with_distance_penalty(distance);
        self
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Scoring engine
    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Caches backing this bank
    pub fn caches(&self) -> &Arc<ScoreCaches> {
        self.scorer.caches()
    }

    /// Build a fresh bank state from `schedule`, replacing any previous one
    pub fn initialize_bank(
        &mut self,
        schedule: &Schedule,
        stop_configs: &StopConfigs,
        constraints: Option<OptimizationConstraints>,
    ) -> &RecoveryBankState {
        let schedule_key = schedule.fingerprint();
        let mut seen = HashSet::new();
        let mut route = Vec::with_capacity(schedule.time_points.len());

        for time_point in &schedule.time_points {
            if !seen.insert(time_point.id.clone()) {
                continue;
            }
            route.push(self.build_account(schedule, schedule_key, time_point, stop_configs));
        }

        self.install_state(route, constraints)
    }

    /// [`initialize_bank`](Self::initialize_bank) for large schedules,
    /// yielding between chunks of stops
    pub async fn initialize_bank_batched(
        &mut self,
        schedule: &Schedule,
        stop_configs: &StopConfigs,
        constraints: Option<OptimizationConstraints>,
    ) -> &RecoveryBankState {
        let schedule_key = schedule.fingerprint();
        let mut seen = HashSet::new();
        let unique: Vec<&TimePoint> = schedule
            .time_points
            .iter()
            .filter(|tp| seen.insert(tp.id.clone()))
            .collect();

        let batching = self.config.batching.clone();
        let route = process_in_chunks(unique, &batching, |time_point| {
            self.build_account(schedule, schedule_key, time_point, stop_configs)
        })
        .await;

        self.install_state(route, constraints)
    }

    fn install_state(
        &mut self,
        route: Vec<RecoveryAccount>,
        constraints: Option<OptimizationConstraints>,
    ) -> &RecoveryBankState {
        self.validator =
            TransactionValidator::new(constraints, self.config.scoring.max_lender_debt_ratio);
        self.ledger.clear();

        let state = RecoveryBankState::from_route(route);
        info!(
            accounts = state.accounts.len(),
            total_available = %state.total_available_recovery,
            "Recovery bank initialized"
        );
        self.metrics.update_utilization(state.utilization_rate);
        self.sync_evictions();

        self.state.insert(state)
    }

    fn build_account(
        &self,
        schedule: &Schedule,
        schedule_key: u64,
        time_point: &TimePoint,
        stop_configs: &StopConfigs,
    ) -> RecoveryAccount {
        let overrides = stop_configs.get(&time_point.id);
        let stop_type = overrides
            .and_then(|o| o.stop_type)
            .unwrap_or_else(|| infer_stop_type(&time_point.name));
        let limits = recovery_limits(stop_type);

        let history = self
            .caches()
            .history
            .get_or_insert_with((schedule_key, time_point.id.clone()), || {
                collect_recovery_history(schedule, &time_point.id)
            });

        let available_credit = mean_minutes(&history)
            .checked_sub(limits.min_recovery_time)
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO)
            .min(limits.max_credit);

        let account = RecoveryAccount {
            stop_id: time_point.id.clone(),
            stop_name: time_point.name.clone(),
            stop_type,
            available_credit,
            current_debt: Decimal::ZERO,
            max_credit: limits.max_credit,
            min_recovery_time: limits.min_recovery_time,
            max_recovery_time: limits.max_recovery_time,
            flexibility_score: self.scorer.flexibility_score(stop_type, &history),
        };

        match overrides {
            Some(o) => apply_override(account, o),
            None => account,
        }
    }

    /// Historical recovery minutes of one stop across all trips
    ///
    /// Memoized only during initialization, where one schedule hash
    /// serves every stop.
    pub fn stop_recovery_history(&self, schedule: &Schedule, stop_id: &StopId) -> Vec<Decimal> {
        collect_recovery_history(schedule, stop_id)
    }

    /// Validate a transfer between two accounts without committing it
    pub fn validate_transaction(
        &self,
        from_stop_id: &StopId,
        to_stop_id: &StopId,
        amount: Decimal,
    ) -> Result<ValidationOutcome> {
        let state = self.state()?;
        let lender = lookup(state, from_stop_id)?;
        let borrower = lookup(state, to_stop_id)?;
        Ok(self.validator.validate(lender, borrower, amount))
    }

    /// Move `amount` minutes of recovery time from one stop to another
    pub fn request_recovery_transfer(
        &mut self,
        from_stop_id: &StopId,
        to_stop_id: &StopId,
        amount: Decimal,
        affected_trips: Vec<String>,
        reason: Option<String>,
    ) -> Result<RecoveryTransaction> {
        let result = self.transfer(from_stop_id, to_stop_id, amount, affected_trips, reason);

        match &result {
            Ok(tx) => {
                self.metrics.record_transfer();
                info!(
                    transaction_id = %tx.id,
                    lender = %from_stop_id,
                    borrower = %to_stop_id,
                    amount = %amount,
                    score = tx.score,
                    "Recovery transfer committed"
                );
            }
            Err(e) => {
                self.metrics.record_rejection();
                debug!(lender = %from_stop_id, borrower = %to_stop_id, amount = %amount, error = %e, "Recovery transfer rejected");
            }
        }
        self.sync_evictions();
        result
    }

    fn transfer(
        &mut self,
        from_stop_id: &StopId,
        to_stop_id: &StopId,
        amount: Decimal,
        affected_trips: Vec<String>,
        reason: Option<String>,
    ) -> Result<RecoveryTransaction> {
        if from_stop_id == to_stop_id {
            return Err(Error::SelfLending(from_stop_id.clone()));
        }
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        let lender = lookup(state, from_stop_id)?;
        let borrower = lookup(state, to_stop_id)?;

        self.validator.check(lender, borrower, amount)?;
        let score = self.scorer.transaction_score(lender, borrower, amount);

        let transaction = RecoveryTransaction {
            id: Uuid::now_v7(),
            lender_stop_id: from_stop_id.clone(),
            borrower_stop_id: to_stop_id.clone(),
            amount,
            affected_trips,
            score,
            transaction_type: TransactionType::Borrow,
            reason,
            created_at: Utc::now(),
        };

        self.ledger.commit(state, transaction.clone())?;
        self.metrics.update_utilization(state.utilization_rate);
        Ok(transaction)
    }

    /// Reverse a committed transaction
    pub fn rollback_transaction(&mut self, transaction_id: Uuid) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        let transaction = self.ledger.rollback(state, transaction_id)?;

        self.metrics.record_rollback();
        self.metrics.update_utilization(state.utilization_rate);
        info!(
            transaction_id = %transaction.id,
            lender = %transaction.lender_stop_id,
            borrower = %transaction.borrower_stop_id,
            amount = %transaction.amount,
            "Recovery transfer rolled back"
        );
        Ok(())
    }

    /// Serve borrow requests in priority order
    ///
    /// `success` means at least one request was met; check
    /// `unmet_requests` for completeness.
    pub fn find_optimal_allocation(
        &mut self,
        requests: Vec<AllocationRequest>,
    ) -> Result<AllocationResult> {
        self.state()?;
        let request_count = requests.len();

        let outcomes: Vec<_> = sort_by_priority(requests)
            .into_iter()
            .map(|request| self.allocate_one(request))
            .collect();

        Ok(self.summarize(request_count, outcomes))
    }

    /// [`find_optimal_allocation`](Self::find_optimal_allocation), yielding
    /// to the runtime between chunks of requests
    pub async fn find_optimal_allocation_batched(
        &mut self,
        requests: Vec<AllocationRequest>,
    ) -> Result<AllocationResult> {
        self.state()?;
        let request_count = requests.len();
        let batching = self.config.batching.clone();

        let outcomes = process_in_chunks(sort_by_priority(requests), &batching, |request| {
            self.allocate_one(request)
        })
        .await;

        Ok(self.summarize(request_count, outcomes))
    }

    fn allocate_one(
        &mut self,
        request: AllocationRequest,
    ) -> std::result::Result<RecoveryTransaction, UnmetRequest> {
        let choice = match self.state.as_ref() {
            Some(state) if state.account(&request.to_stop_id).is_some() => {
                LenderSearch::new(&self.validator, &self.scorer).best_lender(state, &request)
            }
            _ => {
                let reason = Error::AccountNotFound(request.to_stop_id.clone()).to_string();
                return Err(UnmetRequest { request, reason });
            }
        };

        let Some(choice) = choice else {
            return Err(UnmetRequest {
                request,
                reason: NO_LENDER.to_string(),
            });
        };

        let reason = Some(format!("Allocation at priority {}", request.priority));
        match self.request_recovery_transfer(
            &choice.lender,
            &request.to_stop_id,
            request.amount,
            request.affected_trips.clone(),
            reason,
        ) {
            Ok(tx) => Ok(tx),
            Err(e) => Err(UnmetRequest {
                request,
                reason: e.to_string(),
            }),
        }
    }

    fn summarize(
        &mut self,
        request_count: usize,
        outcomes: Vec<std::result::Result<RecoveryTransaction, UnmetRequest>>,
    ) -> AllocationResult {
        let mut result = AllocationResult::default();
        for outcome in outcomes {
            match outcome {
                Ok(tx) => {
                    result.total_score += tx.score;
                    result.allocations.push(tx);
                }
                Err(unmet) => result.unmet_requests.push(unmet),
            }
        }
        result.success = result.unmet_requests.len() < request_count;

        self.metrics.record_allocation(request_count);
        self.sync_evictions();

        if result.unmet_requests.is_empty() {
            info!(met = result.allocations.len(), total_score = result.total_score, "Allocation complete");
        } else {
            warn!(
                met = result.allocations.len(),
                unmet = result.unmet_requests.len(),
                "Allocation left requests unmet"
            );
        }
        result
    }

    /// Current bank state
    pub fn get_bank_state(&self) -> Result<&RecoveryBankState> {
        self.state()
    }

    /// Account snapshot
    pub fn get_account(&self, stop_id: &StopId) -> Result<&RecoveryAccount> {
        lookup(self.state()?, stop_id)
    }

    /// Committed transactions of this session, in commit order
    pub fn get_transaction_history(&self) -> &[RecoveryTransaction] {
        self.ledger.history()
    }

    /// Totals, per-account detail and top lenders/borrowers
    pub fn generate_utilization_report(&self) -> Result<UtilizationReport> {
        Ok(report::generate(self.state()?))
    }

    /// Roll back every transaction, restoring session-start balances
    pub fn reset_bank(&mut self) -> Result<usize> {
        let state = self.state.as_mut().ok_or(Error::NotInitialized)?;
        let count = self.ledger.rollback_all(state)?;
        for _ in 0..count {
            self.metrics.record_rollback();
        }
        self.metrics.update_utilization(state.utilization_rate);
        info!(rolled_back = count, "Recovery bank reset");
        Ok(count)
    }

    /// Drop every cached computation
    pub fn clear_all_caches(&mut self) {
        self.caches().clear_all();
        self.sync_evictions();
        debug!("Recovery bank caches cleared");
    }

    /// Clear caches and reset the ledger
    pub fn clear_caches_and_reset(&mut self) -> Result<usize> {
        self.clear_all_caches();
        self.reset_bank()
    }

    /// Hit/miss counters per cache
    pub fn cache_stats(&self) -> Vec<(&'static str, CacheStats)> {
        self.caches().stats()
    }

    fn state(&self) -> Result<&RecoveryBankState> {
        self.state.as_ref().ok_or(Error::NotInitialized)
    }

    /// Feed evictions observed since the last sync into the metrics;
    /// the total is monotonic even when another session clears shared caches
    fn sync_evictions(&mut self) {
        let total = self.caches().total_evictions();
        self.metrics
            .record_cache_evictions(total.saturating_sub(self.evictions_seen));
        self.evictions_seen = total;
    }
}

fn lookup<'s>(state: &'s RecoveryBankState, stop_id: &StopId) -> Result<&'s RecoveryAccount> {
    state
        .account(stop_id)
        .ok_or_else(|| Error::AccountNotFound(stop_id.clone()))
}

/// Mean of recovery samples, 0 for none
fn mean_minutes(samples: &[Decimal]) -> Decimal {
    if samples.is_empty() {
        return Decimal::ZERO;
    }
    let count = Decimal::from(samples.len());
    match samples
        .iter()
        .try_fold(Decimal::ZERO, |acc, x| acc.checked_add(*x))
    {
        Some(sum) => sum / count,
        // Scale first when the raw total does not fit
        None => samples
            .iter()
            .try_fold(Decimal::ZERO, |acc, x| acc.checked_add(*x / count))
            .unwrap_or(Decimal::MAX),
    }
}

/// Recovery minutes recorded for `stop_id`, in trip order
pub fn collect_recovery_history(schedule: &Schedule, stop_id: &StopId) -> Vec<Decimal> {
    schedule
        .trips
        .iter()
        .filter_map(|trip| trip.recovery_times.get(stop_id).copied())
        .collect()
}

fn apply_override(mut account: RecoveryAccount, o: &AccountOverride) -> RecoveryAccount {
    if let Some(name) = &o.stop_name {
        account.stop_name = name.clone();
    }
    if let Some(v) = o.available_credit {
        account.available_credit = v;
    }
    if let Some(v) = o.current_debt {
        account.current_debt = v;
    }
    if let Some(v) = o.max_credit {
        account.max_credit = v;
    }
    if let Some(v) = o.min_recovery_time {
        account.min_recovery_time = v;
    }
    if let Some(v) = o.max_recovery_time {
        account.max_recovery_time = v;
    }
    if let Some(v) = o.flexibility_score {
        account.flexibility_score = v.clamp(0.0, 1.0);
    }
    account
}
