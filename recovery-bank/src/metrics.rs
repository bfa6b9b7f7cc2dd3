//! Metrics collection for observability
//!
//! Each bank owns its own Prometheus registry, so several sessions in one
//! process never collide on metric registration.
//!
//! # Metrics
//!
//! - `recovery_transfers_total` - Committed transfers
//! - `recovery_transfers_rejected_total` - Transfers refused by validation or lookup
//! - `recovery_rollbacks_total` - Rolled back transfers
//! - `recovery_cache_evictions_total` - Cache entries purged
//! - `recovery_allocation_batch_size` - Histogram of allocation request counts
//! - `recovery_utilization_permille` - Bank utilization rate × 1000

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed transfers
    pub transfers_total: IntCounter,

    /// Rejected transfers
    pub transfers_rejected: IntCounter,

    /// Rollbacks
    pub rollbacks_total: IntCounter,

    /// Cache evictions
    pub cache_evictions: IntCounter,

    /// Allocation batch size histogram
    pub allocation_batch_size: Histogram,

    /// Utilization gauge (permille)
    pub utilization: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transfers_total", &self.transfers_total.get())
            .field("rollbacks_total", &self.rollbacks_total.get())
            .field("utilization", &self.utilization.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_total =
            IntCounter::new("recovery_transfers_total", "Committed recovery transfers")?;
        registry.register(Box::new(transfers_total.clone()))?;

        let transfers_rejected = IntCounter::new(
            "recovery_transfers_rejected_total",
            "Recovery transfers refused by validation or lookup",
        )?;
        registry.register(Box::new(transfers_rejected.clone()))?;

        let rollbacks_total =
            IntCounter::new("recovery_rollbacks_total", "Rolled back recovery transfers")?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        let cache_evictions =
            IntCounter::new("recovery_cache_evictions_total", "Cache entries purged")?;
        registry.register(Box::new(cache_evictions.clone()))?;

        let allocation_batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "recovery_allocation_batch_size",
                "Histogram of allocation request counts",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;
        registry.register(Box::new(allocation_batch_size.clone()))?;

        let utilization = IntGauge::new(
            "recovery_utilization_permille",
            "Borrowed over available recovery time, in permille",
        )?;
        registry.register(Box::new(utilization.clone()))?;

        Ok(Self {
            transfers_total,
            transfers_rejected,
            rollbacks_total,
            cache_evictions,
            allocation_batch_size,
            utilization,
            registry,
        })
    }

    /// Record a committed transfer
    pub fn record_transfer(&self) {
        self.transfers_total.inc();
    }

    /// Record a rejected transfer
    pub fn record_rejection(&self) {
        self.transfers_rejected.inc();
    }

    /// Record a rollback
    pub fn record_rollback(&self) {
        self.rollbacks_total.inc();
    }

    /// Record purged cache entries
    pub fn record_cache_evictions(&self, count: u64) {
        self.cache_evictions.inc_by(count);
    }

    /// Record an allocation run
    pub fn record_allocation(&self, request_count: usize) {
        self.allocation_batch_size.observe(request_count as f64);
    }

    /// Update utilization gauge
    pub fn update_utilization(&self, rate: f64) {
        self.utilization.set((rate * 1000.0).round() as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.transfers_total.get(), 0);
        assert_eq!(metrics.rollbacks_total.get(), 0);
        // Independent registries
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn test_record_transfer_and_rollback() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transfer();
        metrics.record_transfer();
        metrics.record_rollback();
        metrics.record_rejection();
        assert_eq!(metrics.transfers_total.get(), 2);
        assert_eq!(metrics.rollbacks_total.get(), 1);
        assert_eq!(metrics.transfers_rejected.get(), 1);
    }

    #[test]
    fn test_record_cache_evictions() {
        let metrics = Metrics::new().unwrap();
        metrics.record_cache_evictions(5);
        metrics.record_cache_evictions(0);
        metrics.record_cache_evictions(3);
        assert_eq!(metrics.cache_evictions.get(), 8);
    }

    #[test]
    fn test_update_utilization() {
        let metrics = Metrics::new().unwrap();
        metrics.update_utilization(0.2727);
        assert_eq!(metrics.utilization.get(), 273);
        assert_eq!(metrics.registry().gather().len(), 6);
    }
}
