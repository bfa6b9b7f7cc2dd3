//! Core types for the recovery bank
//!
//! All recovery quantities are minutes held as exact decimals, so a
//! transfer followed by its rollback restores balances exactly. Scores
//! are plain `f64` in `[0, 1]`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Stop identifier (time point id in the schedule)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StopId(String);

impl StopId {
    /// Create new stop ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StopId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Operational category of a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    /// Route terminal or station
    Terminal,
    /// Shopping mall or plaza
    Mall,
    /// Busy stop such as a college campus
    MajorStop,
    /// Hospital or medical centre
    Hospital,
    /// School
    School,
    /// Anything else
    Regular,
}

impl StopType {
    /// All categories, most generous first
    pub const ALL: [StopType; 6] = [
        StopType::Terminal,
        StopType::Mall,
        StopType::MajorStop,
        StopType::Regular,
        StopType::Hospital,
        StopType::School,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            StopType::Terminal => "terminal",
            StopType::Mall => "mall",
            StopType::MajorStop => "major_stop",
            StopType::Hospital => "hospital",
            StopType::School => "school",
            StopType::Regular => "regular",
        }
    }
}

impl fmt::Display for StopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category-derived recovery bounds (minutes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryLimits {
    /// Floor a stop never lends below
    pub min_recovery_time: Decimal,
    /// Ceiling on debt a stop may hold
    pub max_recovery_time: Decimal,
    /// Ceiling on lendable credit
    pub max_credit: Decimal,
}

/// Recovery account, one per stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAccount {
    /// Stop this account belongs to
    pub stop_id: StopId,

    /// Human-readable stop name
    pub stop_name: String,

    /// Stop category
    pub stop_type: StopType,

    /// Minutes this stop can currently lend
    pub available_credit: Decimal,

    /// Minutes this stop has currently borrowed
    pub current_debt: Decimal,

    /// Credit ceiling
    pub max_credit: Decimal,

    /// Recovery floor
    pub min_recovery_time: Decimal,

    /// Debt ceiling
    pub max_recovery_time: Decimal,

    /// 0..1, higher lends more readily
    pub flexibility_score: f64,
}

impl RecoveryAccount {
    /// Account after lending `amount`
    pub fn lend(&self, amount: Decimal) -> Self {
        Self {
            available_credit: self.available_credit - amount,
            ..self.clone()
        }
    }

    /// Account after a lent `amount` is returned
    pub fn repay_loan(&self, amount: Decimal) -> Self {
        Self {
            available_credit: self.available_credit + amount,
            ..self.clone()
        }
    }

    /// Account after borrowing `amount`
    pub fn borrow(&self, amount: Decimal) -> Self {
        Self {
            current_debt: self.current_debt + amount,
            ..self.clone()
        }
    }

    /// Account after a borrowed `amount` is returned
    pub fn settle_debt(&self, amount: Decimal) -> Self {
        Self {
            current_debt: self.current_debt - amount,
            ..self.clone()
        }
    }

    /// Debt divided by max credit, with the denominator floored at one minute
    pub fn debt_ratio(&self) -> Decimal {
        self.current_debt / self.max_credit.max(Decimal::ONE)
    }

    /// Share of max credit taken up by debt (0 when max credit is 0)
    pub fn lender_utilization(&self) -> f64 {
        ratio(self.current_debt, self.max_credit)
    }

    /// Share of the recovery ceiling taken up by debt
    pub fn borrower_utilization(&self) -> f64 {
        ratio(self.current_debt, self.max_recovery_time)
    }

    /// `0 <= debt <= max_recovery_time` and `0 <= credit <= max_credit`
    pub fn is_within_limits(&self) -> bool {
        self.current_debt >= Decimal::ZERO
            && self.current_debt <= self.max_recovery_time
            && self.available_credit >= Decimal::ZERO
            && self.available_credit <= self.max_credit
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    // Quotients past Decimal range only arise from tiny overridden ceilings
    numerator
        .checked_div(denominator)
        .and_then(|q| q.to_f64())
        .unwrap_or(f64::MAX)
}

static NEXT_STATE_VERSION: AtomicU64 = AtomicU64::new(1);

/// Fresh process-unique state version
pub fn next_state_version() -> u64 {
    NEXT_STATE_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Borrower takes recovery time from lender
    Borrow,
}

/// Committed recovery transfer, never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTransaction {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Stop giving up recovery time
    pub lender_stop_id: StopId,

    /// Stop receiving recovery time
    pub borrower_stop_id: StopId,

    /// Minutes moved (> 0)
    pub amount: Decimal,

    /// Trips impacted, in caller order
    pub affected_trips: Vec<String>,

    /// Desirability at commit time
    pub score: f64,

    /// Transaction kind
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,

    /// Free-form reason supplied by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

/// Session-scoped bank state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryBankState {
    /// Accounts keyed by stop
    pub accounts: BTreeMap<StopId, RecoveryAccount>,

    /// Committed transactions in commit order
    pub transactions: Vec<RecoveryTransaction>,

    /// Lendable pool at session start
    pub total_available_recovery: Decimal,

    /// Minutes currently on loan
    pub total_borrowed_recovery: Decimal,

    /// borrowed / available (0 when nothing is available)
    pub utilization_rate: f64,

    /// Stops in route (time point) order
    #[serde(default)]
    pub stop_order: Vec<StopId>,

    /// Process-unique version, renewed by every ledger mutation
    #[serde(skip, default = "next_state_version")]
    pub version: u64,
}

impl RecoveryBankState {
    /// Build state from freshly initialized accounts, in stop-id order
    pub fn new(accounts: BTreeMap<StopId, RecoveryAccount>) -> Self {
        let stop_order = accounts.keys().cloned().collect();
        Self::with_order(accounts, stop_order)
    }

    /// Build state from accounts listed in route order
    ///
    /// A repeated stop keeps its first position and its last account.
    pub fn from_route(route: Vec<RecoveryAccount>) -> Self {
        let mut stop_order = Vec::with_capacity(route.len());
        let mut accounts = BTreeMap::new();
        for account in route {
            if !accounts.contains_key(&account.stop_id) {
                stop_order.push(account.stop_id.clone());
            }
            accounts.insert(account.stop_id.clone(), account);
        }
        Self::with_order(accounts, stop_order)
    }

    fn with_order(accounts: BTreeMap<StopId, RecoveryAccount>, stop_order: Vec<StopId>) -> Self {
        let total_available_recovery = accounts
            .values()
            .fold(Decimal::ZERO, |acc, a| acc.saturating_add(a.available_credit));
        let total_borrowed_recovery = accounts
            .values()
            .fold(Decimal::ZERO, |acc, a| acc.saturating_add(a.current_debt));

        let mut state = Self {
            accounts,
            transactions: Vec::new(),
            total_available_recovery,
            total_borrowed_recovery,
            utilization_rate: 0.0,
            stop_order,
            version: next_state_version(),
        };
        state.recompute_utilization();
        state
    }

    /// Account lookup
    pub fn account(&self, stop_id: &StopId) -> Option<&RecoveryAccount> {
        self.accounts.get(stop_id)
    }

    /// Accounts in route order
    ///
    /// Falls back to stop-id order when no route order is recorded.
    pub fn accounts_in_order(&self) -> Box<dyn Iterator<Item = &RecoveryAccount> + '_> {
        if self.stop_order.is_empty() {
            Box::new(self.accounts.values())
        } else {
            Box::new(self.stop_order.iter().filter_map(|id| self.accounts.get(id)))
        }
    }

    /// Mark the state as changed
    pub fn touch(&mut self) {
        self.version = next_state_version();
    }

    /// Refresh `utilization_rate` from the running totals
    pub fn recompute_utilization(&mut self) {
        self.utilization_rate = ratio(self.total_borrowed_recovery, self.total_available_recovery);
    }

    /// Σ(credit) + Σ(debt), constant under transfers
    pub fn total_balance(&self) -> Decimal {
        self.accounts.values().fold(Decimal::ZERO, |acc, a| {
            acc.saturating_add(a.available_credit)
                .saturating_add(a.current_debt)
        })
    }
}

/// Read-only optimization constraints supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptimizationConstraints {
    /// Upper bound on any single transaction amount
    pub max_trip_deviation: Decimal,
}

/// Time point of a schedule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimePoint {
    /// Stop ID
    pub id: StopId,
    /// Stop name
    pub name: String,
}

/// Trip of a schedule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trip {
    /// Trip identifier
    pub trip_id: String,
    /// Recovery minutes held at each stop on this trip
    #[serde(default)]
    pub recovery_times: BTreeMap<StopId, Decimal>,
}

/// Read-only schedule produced upstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schedule {
    /// Time points in route order
    pub time_points: Vec<TimePoint>,
    /// Trips
    pub trips: Vec<Trip>,
}

impl Schedule {
    /// Content hash, used to key recovery history lookups
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Operator override for a stop's account; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountOverride {
    /// Pin the stop name
    pub stop_name: Option<String>,
    /// Pin the category (limits and flexibility follow it)
    pub stop_type: Option<StopType>,
    /// Pin the starting credit
    pub available_credit: Option<Decimal>,
    /// Pin the starting debt
    pub current_debt: Option<Decimal>,
    /// Pin the credit ceiling
    pub max_credit: Option<Decimal>,
    /// Pin the recovery floor
    pub min_recovery_time: Option<Decimal>,
    /// Pin the debt ceiling
    pub max_recovery_time: Option<Decimal>,
    /// Pin the flexibility score
    pub flexibility_score: Option<f64>,
}

/// Overrides keyed by stop
pub type StopConfigs = HashMap<StopId, AccountOverride>;

/// Borrow request fed to the allocator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Preferred lender, if any
    #[serde(default)]
    pub from_stop_id: Option<StopId>,
    /// Borrowing stop
    pub to_stop_id: StopId,
    /// Minutes requested
    pub amount: Decimal,
    /// Higher is served first
    pub priority: u32,
    /// Trips impacted
    #[serde(default)]
    pub affected_trips: Vec<String>,
}

/// Request the allocator could not satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmetRequest {
    /// Original request
    pub request: AllocationRequest,
    /// Why it failed
    pub reason: String,
}

/// Allocation outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    /// At least one request was met
    pub success: bool,
    /// Committed transactions in priority order
    pub allocations: Vec<RecoveryTransaction>,
    /// Sum of committed scores
    pub total_score: f64,
    /// Requests left unmet, in priority order
    pub unmet_requests: Vec<UnmetRequest>,
}

/// One optimization session as fed to the bank: schedule, overrides,
/// constraints and borrow requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Schedule to build accounts from
    pub schedule: Schedule,
    /// Per-stop overrides
    #[serde(default)]
    pub stop_configs: StopConfigs,
    /// Optional constraints
    #[serde(default)]
    pub constraints: Option<OptimizationConstraints>,
    /// Borrow requests
    #[serde(default)]
    pub requests: Vec<AllocationRequest>,
}

impl Session {
    /// Parse a session from JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a session from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(credit: i64, debt: i64) -> RecoveryAccount {
        RecoveryAccount {
            stop_id: StopId::new("A"),
            stop_name: "Stop A".to_string(),
            stop_type: StopType::Regular,
            available_credit: Decimal::from(credit),
            current_debt: Decimal::from(debt),
            max_credit: Decimal::from(3),
            min_recovery_time: Decimal::ZERO,
            max_recovery_time: Decimal::from(6),
            flexibility_score: 0.6,
        }
    }

    #[test]
    fn test_lend_and_repay_are_inverse() {
        let original = account(3, 0);
        let amount = Decimal::new(15, 1);
        assert_eq!(original.lend(amount).repay_loan(amount), original);
        assert_eq!(original.borrow(amount).settle_debt(amount), original);
    }

    #[test]
    fn test_utilization_zero_denominator() {
        let mut acc = account(0, 2);
        acc.max_credit = Decimal::ZERO;
        assert_eq!(acc.lender_utilization(), 0.0);
        assert_eq!(acc.debt_ratio(), Decimal::from(2));
    }

    #[test]
    fn test_state_totals() {
        let mut accounts = BTreeMap::new();
        accounts.insert(StopId::new("A"), account(3, 0));
        let mut b = account(1, 0);
        b.stop_id = StopId::new("B");
        accounts.insert(StopId::new("B"), b);

        let state = RecoveryBankState::new(accounts);
        assert_eq!(state.total_available_recovery, Decimal::from(4));
        assert_eq!(state.total_borrowed_recovery, Decimal::ZERO);
        assert_eq!(state.utilization_rate, 0.0);
        assert_eq!(state.total_balance(), Decimal::from(4));
    }

    #[test]
    fn test_version_renewed_on_touch() {
        let mut accounts = BTreeMap::new();
        accounts.insert(StopId::new("A"), account(3, 0));
        let state = RecoveryBankState::new(accounts.clone());
        let other = RecoveryBankState::new(accounts);
        assert_ne!(state.version, other.version);

        let mut touched = state.clone();
        assert_eq!(touched.version, state.version);
        touched.touch();
        assert_ne!(touched.version, state.version);
    }

    #[test]
    fn test_route_order_kept() {
        let mut s10 = account(1, 0);
        s10.stop_id = StopId::new("S10");
        let mut s2 = account(1, 0);
        s2.stop_id = StopId::new("S2");

        let state = RecoveryBankState::from_route(vec![s2, s10.clone(), s10]);
        let order: Vec<&str> = state.accounts_in_order().map(|a| a.stop_id.as_str()).collect();
        assert_eq!(order, vec!["S2", "S10"]);
        assert_eq!(state.total_available_recovery, Decimal::from(2));
    }

    #[test]
    fn test_totals_saturate() {
        let mut huge = account(0, 0);
        huge.available_credit = Decimal::MAX;
        let mut other = huge.clone();
        other.stop_id = StopId::new("B");

        let state = RecoveryBankState::from_route(vec![huge, other]);
        assert_eq!(state.total_available_recovery, Decimal::MAX);
        assert_eq!(state.total_balance(), Decimal::MAX);
    }

    #[test]
    fn test_session_from_json() {
        let session = Session::from_json(
            r#"{
                "schedule": {
                    "time_points": [{"id": "A", "name": "Downtown Terminal"}],
                    "trips": [{"trip_id": "t1", "recovery_times": {"A": 10}}]
                },
                "requests": [{"to_stop_id": "A", "amount": "1.5", "priority": 3}]
            }"#,
        )
        .unwrap();

        assert_eq!(session.schedule.time_points.len(), 1);
        assert_eq!(session.requests[0].amount, Decimal::new(15, 1));
        assert!(session.constraints.is_none());

        assert!(matches!(
            Session::from_json("{\"schedule\": 3}"),
            Err(crate::Error::Serialization(_))
        ));
        assert!(matches!(
            Session::from_file("/nonexistent/session.json"),
            Err(crate::Error::Io(_))
        ));
    }

    #[test]
    fn test_stop_type_serde_names() {
        let json = serde_json::to_string(&StopType::MajorStop).unwrap();
        assert_eq!(json, "\"major_stop\"");
        let parsed: StopType = serde_json::from_str("\"hospital\"").unwrap();
        assert_eq!(parsed, StopType::Hospital);
    }
}
