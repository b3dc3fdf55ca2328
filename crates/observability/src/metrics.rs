//! Prometheus metrics for the ledger
//!
//! Metric handles are resolved through the `metrics` facade, so every
//! method here is a no-op until [`init_metrics`] installs a recorder.

use metrics::{counter, gauge, histogram, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Initialize the Prometheus metrics exporter
///
/// This starts an HTTP listener on the specified port that exposes metrics
/// at the `/metrics` endpoint.
///
/// ```ignore
/// observability::metrics::init_metrics(9090)?;
/// // Metrics available at http://localhost:9090/metrics
/// ```
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Ledger metric set
///
/// # Metrics
///
/// * `ledger_settlements_total{outcome}` - settled, skipped, duplicate or failed matches
/// * `ledger_settlement_duration_seconds` - wall time of one settlement step
/// * `ledger_balance_adjustments_total{direction}` - committed credits and debits
/// * `ledger_reserve_lock_busy_total` - lock attempts that found the key busy
/// * `ledger_chain_events_total{outcome}` - reconciler ingest / confirm outcomes
/// * `ledger_publish_failures_total{topic}` - notifications that could not be delivered
/// * `ledger_commands_in_flight` - worker commands currently executing
#[derive(Clone)]
pub struct LedgerMetrics {
    settlement_duration: Histogram,
    commands_in_flight: Gauge,
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self {
            settlement_duration: histogram!("ledger_settlement_duration_seconds"),
            commands_in_flight: gauge!("ledger_commands_in_flight"),
        }
    }

    /// Record a finished settlement
    pub fn record_settlement(&self, outcome: &'static str, duration: Duration) {
        counter!("ledger_settlements_total", "outcome" => outcome).increment(1);
        self.settlement_duration.record(duration.as_secs_f64());
    }

    /// Record balance adjustments whose transaction committed
    pub fn record_balance_adjustments(&self, direction: &'static str, count: u64) {
        counter!("ledger_balance_adjustments_total", "direction" => direction).increment(count);
    }

    pub fn record_reserve_busy(&self) {
        counter!("ledger_reserve_lock_busy_total").increment(1);
    }

    pub fn record_chain_event(&self, outcome: &'static str) {
        counter!("ledger_chain_events_total", "outcome" => outcome).increment(1);
    }

    pub fn record_publish_failure(&self, topic: &str) {
        counter!("ledger_publish_failures_total", "topic" => topic.to_string()).increment(1);
    }

    /// Start timing a settlement; the outcome is recorded on drop
    pub fn settlement_timer(&self) -> SettlementTimer<'_> {
        SettlementTimer {
            metrics: self,
            start: Instant::now(),
            outcome: "failed",
        }
    }

    pub fn command_started(&self) {
        self.commands_in_flight.increment(1.0);
    }

    pub fn command_finished(&self) {
        self.commands_in_flight.decrement(1.0);
    }
}

/// Records a settlement's duration and outcome when dropped
///
/// The outcome defaults to `failed`, so an early return through `?`
/// is counted without extra bookkeeping.
pub struct SettlementTimer<'a> {
    metrics: &'a LedgerMetrics,
    start: Instant,
    outcome: &'static str,
}

impl SettlementTimer<'_> {
    pub fn set_outcome(&mut self, outcome: &'static str) {
        self.outcome = outcome;
    }
}

impl Drop for SettlementTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .record_settlement(self.outcome, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        let metrics = LedgerMetrics::new();
        metrics.record_balance_adjustments("credit", 2);
        metrics.record_publish_failure("exchange");
        let mut timer = metrics.settlement_timer();
        timer.set_outcome("settled");
    }
}
