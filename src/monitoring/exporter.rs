//! Prometheus Exporter
//!
//! Mirrors [`CacheMetrics`] into a private `prometheus::Registry` and
//! renders the text exposition format. Values are copied from the
//! registry on each [`PrometheusExporter::update`], so everything is
//! exported as a gauge.
//!
//! [`CacheMetrics`]: crate::cache::CacheMetrics

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::{CacheBackend, CacheTier, Operation};
use crate::error::Result;
use crate::monitoring::health::{HealthReport, HealthStatus};

const NAMESPACE: &str = "europmc_cache";

/// Latency quantiles exported per tier and operation
const QUANTILES: [(f64, &str); 3] = [(50.0, "0.5"), (95.0, "0.95"), (99.0, "0.99")];

/// Prometheus view of a cache backend
pub struct PrometheusExporter {
    registry: Registry,
    requests: IntGauge,
    hit_rate: Gauge,
    miss_rate: Gauge,
    error_rate: Gauge,
    /// Per-tier counters, labelled by `tier` and `event`
    tier_events: IntGaugeVec,
    /// Latency in milliseconds, labelled by `tier`, `operation` and `quantile`
    latency: GaugeVec,
    entries: IntGaugeVec,
    size_bytes: IntGaugeVec,
    disk_usage: Gauge,
    /// 0 healthy, 1 warning, 2 critical, -1 unknown
    health_status: IntGauge,
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish_non_exhaustive()
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

impl PrometheusExporter {
    /// Create an exporter with all metrics registered
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntGauge::with_opts(opts("requests", "Backend lookups"))?;
        let hit_rate = Gauge::with_opts(opts("hit_rate", "Overall hit rate"))?;
        let miss_rate = Gauge::with_opts(opts("miss_rate", "Overall miss rate"))?;
        let error_rate = Gauge::with_opts(opts("error_rate", "Failed store operation rate"))?;
        let tier_events = IntGaugeVec::new(
            opts("tier_events", "Per-tier operation counts"),
            &["tier", "event"],
        )?;
        let latency = GaugeVec::new(
            opts("latency_ms", "Operation latency quantiles in milliseconds"),
            &["tier", "operation", "quantile"],
        )?;
        let entries = IntGaugeVec::new(opts("entries", "Stored entries"), &["tier"])?;
        let size_bytes = IntGaugeVec::new(opts("size_bytes", "Stored value bytes"), &["tier"])?;
        let disk_usage = Gauge::with_opts(opts("disk_usage_ratio", "Fraction of disk limit used"))?;
        let health_status = IntGauge::with_opts(opts(
            "health_status",
            "0 healthy, 1 warning, 2 critical, -1 unknown",
        ))?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(hit_rate.clone()))?;
        registry.register(Box::new(miss_rate.clone()))?;
        registry.register(Box::new(error_rate.clone()))?;
        registry.register(Box::new(tier_events.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(entries.clone()))?;
        registry.register(Box::new(size_bytes.clone()))?;
        registry.register(Box::new(disk_usage.clone()))?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            registry,
            requests,
            hit_rate,
            miss_rate,
            error_rate,
            tier_events,
            latency,
            entries,
            size_bytes,
            disk_usage,
            health_status,
        })
    }

    /// Copy the backend's current metrics, and optionally a health verdict
    pub fn update(&self, backend: &CacheBackend, report: Option<&HealthReport>) {
        let metrics = backend.metrics();
        let stats = backend.get_stats();

        self.requests.set(stats.overall.requests as i64);
        self.hit_rate.set(stats.overall.hit_rate);
        self.miss_rate.set(stats.overall.miss_rate);
        self.error_rate.set(stats.overall.error_rate);

        let mut layers = vec![(CacheTier::L1, stats.layers.l1)];
        if let Some(l2) = stats.layers.l2 {
            layers.push((CacheTier::L2, l2));
        }

        for (tier, layer) in layers {
            let label = tier.label();
            let counters = [
                ("hits", layer.metrics.hits),
                ("misses", layer.metrics.misses),
                ("sets", layer.metrics.sets),
                ("deletes", layer.metrics.deletes),
                ("evictions", layer.metrics.evictions),
                ("errors", layer.metrics.errors),
            ];
            for (event, value) in counters {
                self.tier_events
                    .with_label_values(&[label, event])
                    .set(value as i64);
            }

            self.entries
                .with_label_values(&[label])
                .set(layer.store.entries as i64);
            self.size_bytes
                .with_label_values(&[label])
                .set(layer.store.size_bytes as i64);

            for op in Operation::ALL {
                let window = metrics.latency(tier, op);
                for (p, quantile) in QUANTILES {
                    if let Some(value) = window.percentile(p) {
                        self.latency
                            .with_label_values(&[label, op.label(), quantile])
                            .set(value);
                    }
                }
            }
        }

        if let Some(usage) = backend.l2_disk_usage() {
            self.disk_usage.set(usage);
        }

        if let Some(report) = report {
            self.health_status.set(match report.status {
                HealthStatus::Healthy => 0,
                HealthStatus::Warning => 1,
                HealthStatus::Critical => 2,
                HealthStatus::Unknown => -1,
            });
        }
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::Error::Internal(format!("metrics not UTF-8: {}", e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
