//! Prometheus counters for intake and settlement

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    pub bets_accepted: IntCounter,
    pub bets_rejected: IntCounterVec,
    pub settlements: IntCounter,
    pub lock_contention: IntCounter,
    pub settlement_failures: IntCounterVec,
    pub overrides: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("periodiq".to_string()), None)?;

        let bets_accepted = IntCounter::new("bets_accepted_total", "Bets accepted at intake")?;
        let bets_rejected = IntCounterVec::new(
            Opts::new("bets_rejected_total", "Bets rejected at intake"),
            &["reason"],
        )?;
        let settlements = IntCounter::new("settlements_total", "Periods resolved")?;
        let lock_contention = IntCounter::new(
            "lock_contention_total",
            "Settlement attempts that found the lease taken",
        )?;
        let settlement_failures = IntCounterVec::new(
            Opts::new("settlement_failures_total", "Settlement attempts that failed"),
            &["kind"],
        )?;
        let overrides = IntCounter::new("overrides_total", "Admin overrides stored")?;

        registry.register(Box::new(bets_accepted.clone()))?;
        registry.register(Box::new(bets_rejected.clone()))?;
        registry.register(Box::new(settlements.clone()))?;
        registry.register(Box::new(lock_contention.clone()))?;
        registry.register(Box::new(settlement_failures.clone()))?;
        registry.register(Box::new(overrides.clone()))?;

        Ok(Self {
            registry,
            bets_accepted,
            bets_rejected,
            settlements,
            lock_contention,
            settlement_failures,
            overrides,
        })
    }

    /// Text exposition format
    pub fn to_prometheus_format(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "metrics encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.settlements.inc();
        metrics
            .settlement_failures
            .with_label_values(&["integrity"])
            .inc();

        let text = metrics.to_prometheus_format();
        assert!(text.contains("periodiq_settlements_total 1"));
        assert!(text.contains("kind=\"integrity\""));
    }
}
