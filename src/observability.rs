pub mod metrics;
pub mod tracing;

use std::sync::Arc;

use anyhow::Result;
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;
use self::tracing::OtelSettings;

/// Owns tracing initialization and the worker's private metrics registry.
#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// Initializes tracing (once per process) and registers the metrics.
    ///
    /// # Errors
    /// Fails when the subscriber cannot be installed or a metric fails to register.
    pub fn new(otel: &OtelSettings) -> Result<Self> {
        tracing::init(otel)?;
        Ok(Self::metrics_only()?)
    }

    /// Metrics without touching the global subscriber.
    ///
    /// # Errors
    /// Fails when a metric fails to register.
    pub fn metrics_only() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(Arc::clone(&registry))?);
        Ok(Self { registry, metrics })
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[must_use]
    pub fn metrics_arc(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn record_ready_probe(&self) {
        ::tracing::debug!("ready probe");
    }

    pub fn record_live_probe(&self) {
        ::tracing::debug!("live probe");
    }

    /// Encodes the private registry in the Prometheus text format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_worker_metrics() {
        let telemetry = Telemetry::metrics_only().expect("telemetry");
        telemetry.metrics().cache_hits.inc();

        let rendered = telemetry.render_prometheus();

        assert!(rendered.contains("opinion_cache_hits_total 1"));
    }

    #[test]
    fn instances_do_not_share_registries() {
        let first = Telemetry::metrics_only().expect("first");
        let second = Telemetry::metrics_only().expect("second");
        first.metrics().runs_failed.inc();

        assert!(!second.render_prometheus().contains("opinion_runs_failed_total 1"));
    }
}
