//! Prometheus metrics for monitoring turnstile.
//!
//! Covers snapshot state, lookup traffic, and refresh outcomes.

use crate::cache::snapshot::MemberSnapshot;
use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;
use tracing::error;

/// All metrics for the turnstile service
pub struct Metrics {
    pub registry: Registry,

    // Snapshot metrics
    pub snapshot_members_total: Gauge,
    pub snapshot_conflicts_total: Gauge,
    pub snapshot_build_duration_seconds: Gauge,

    // Lookup metrics
    pub lookups_total: CounterVec,

    // Refresh metrics
    pub refreshes_total: CounterVec,
    pub refresh_duration_seconds: Histogram,
}

impl Metrics {
    /// Create a new metrics registry with all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let snapshot_members_total = Gauge::with_opts(Opts::new(
            "turnstile_snapshot_members_total",
            "Number of distinct emails in the snapshot",
        ))?;
        registry.register(Box::new(snapshot_members_total.clone()))?;

        let snapshot_conflicts_total = Gauge::with_opts(Opts::new(
            "turnstile_snapshot_conflicts_total",
            "Double-active-subscription anomalies in the current snapshot",
        ))?;
        registry.register(Box::new(snapshot_conflicts_total.clone()))?;

        let snapshot_build_duration_seconds = Gauge::with_opts(Opts::new(
            "turnstile_snapshot_build_duration_seconds",
            "How long the last snapshot merge took",
        ))?;
        registry.register(Box::new(snapshot_build_duration_seconds.clone()))?;

        let lookups_total = CounterVec::new(
            Opts::new("turnstile_lookups_total", "Membership lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(lookups_total.clone()))?;

        let refreshes_total = CounterVec::new(
            Opts::new(
                "turnstile_refreshes_total",
                "Refresh attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(refreshes_total.clone()))?;

        let refresh_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "turnstile_refresh_duration_seconds",
                "Refresh attempt duration",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(refresh_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            snapshot_members_total,
            snapshot_conflicts_total,
            snapshot_build_duration_seconds,
            lookups_total,
            refreshes_total,
            refresh_duration_seconds,
        })
    }

    /// Record a lookup result
    pub fn record_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.lookups_total.with_label_values(&[result]).inc();
    }

    /// Record a refresh attempt completion
    pub fn record_refresh(&self, outcome: &str, duration_secs: f64) {
        self.refreshes_total.with_label_values(&[outcome]).inc();
        self.refresh_duration_seconds.observe(duration_secs);
    }

    /// Update snapshot gauges from a freshly built snapshot
    pub fn update_snapshot_metrics(&self, snapshot: &MemberSnapshot) {
        self.snapshot_members_total
            .set(snapshot.meta.member_count as f64);
        self.snapshot_conflicts_total
            .set(snapshot.meta.conflict_count as f64);
        self.snapshot_build_duration_seconds
            .set(snapshot.meta.build_duration_ms as f64 / 1000.0);
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> SharedMetrics {
    Arc::new(Metrics::new().expect("Failed to create metrics"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics
            .render()
            .contains("turnstile_snapshot_members_total"));
    }

    #[test]
    fn test_lookup_and_refresh_recording() {
        let metrics = Metrics::new().unwrap();
        metrics.record_lookup(true);
        metrics.record_refresh("success", 0.5);

        let output = metrics.render();
        assert!(output.contains("turnstile_lookups_total"));
        assert!(output.contains("turnstile_refreshes_total"));
    }
}
