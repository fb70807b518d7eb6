//! Cache Health Monitor
//!
//! Evaluates a backend's metrics against thresholds and raises alerts.
//!
//! # Design
//!
//! Evaluation is pull-based and stateless: [`CacheHealthMonitor::check_health`]
//! reads the current counters, so two checks with no activity in between
//! give the same verdict. Each threshold is checked independently; any
//! breach makes the status at least `WARNING`, and a breach past the
//! critical level makes it `CRITICAL`.
//!
//! Callers poll on their own cadence, or use [`CacheHealthMonitor::run`]
//! from a tokio task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheBackend, CacheTier, MetricsSnapshot, Operation};

// =============================================================================
// Status & Issues
// =============================================================================

/// Overall health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    /// Nothing recorded yet
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Warning => write!(f, "WARNING"),
            HealthStatus::Critical => write!(f, "CRITICAL"),
            HealthStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Severity of one threshold breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

/// One threshold breach, complete enough to drive an alert on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub severity: Severity,
    /// `overall`, `l1` or `l2`
    pub component: String,
    pub metric: String,
    pub message: String,
    pub value: f64,
    /// The threshold that was crossed
    pub threshold: f64,
}

/// Result of one health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
    pub metrics: MetricsSnapshot,
    /// Fraction of the disk size limit in use
    pub disk_usage: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Whether the report should trigger alerts
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, HealthStatus::Warning | HealthStatus::Critical)
    }

    pub fn issue(&self, component: &str, metric: &str) -> Option<&HealthIssue> {
        self.issues
            .iter()
            .find(|i| i.component == component && i.metric == metric)
    }
}

// =============================================================================
// Thresholds
// =============================================================================

/// Health thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Minimum overall hit rate
    pub min_hit_rate: f64,
    /// Maximum failed-operation rate
    pub max_error_rate: f64,
    /// Maximum L1 get p99 in milliseconds
    pub max_l1_p99_ms: f64,
    /// Maximum L2 get p99 in milliseconds
    pub max_l2_p99_ms: f64,
    /// Maximum fraction of the disk size limit in use
    pub max_disk_usage: f64,
    /// Minimum L2 hit rate over lookups that reached L2
    pub min_l2_hit_rate: f64,

    /// Hit rate below which the breach is critical
    pub critical_hit_rate: f64,
    /// Error rate above which the breach is critical
    pub critical_error_rate: f64,
    /// Multiple of a latency threshold at which the breach is critical
    pub critical_latency_factor: f64,
    /// Disk usage above which the breach is critical
    pub critical_disk_usage: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.70,
            max_error_rate: 0.05,
            max_l1_p99_ms: 5.0,
            max_l2_p99_ms: 50.0,
            max_disk_usage: 0.90,
            min_l2_hit_rate: 0.30,
            critical_hit_rate: 0.40,
            critical_error_rate: 0.20,
            critical_latency_factor: 4.0,
            critical_disk_usage: 0.98,
        }
    }
}

fn issue(
    severity: Severity,
    component: &str,
    metric: &str,
    message: String,
    value: f64,
    threshold: f64,
) -> HealthIssue {
    HealthIssue {
        severity,
        component: component.to_string(),
        metric: metric.to_string(),
        message,
        value,
        threshold,
    }
}

/// Breach when `value` falls below `min`
fn check_min(
    component: &str,
    metric: &str,
    value: f64,
    min: f64,
    critical: Option<f64>,
) -> Option<HealthIssue> {
    if value >= min {
        return None;
    }
    let (severity, threshold) = match critical {
        Some(critical) if value < critical => (Severity::Critical, critical),
        _ => (Severity::Warning, min),
    };
    Some(issue(
        severity,
        component,
        metric,
        format!("{} {} {:.3} is below {:.3}", component, metric, value, threshold),
        value,
        threshold,
    ))
}

/// Breach when `value` exceeds `max`
fn check_max(
    component: &str,
    metric: &str,
    value: f64,
    max: f64,
    critical: Option<f64>,
) -> Option<HealthIssue> {
    if value <= max {
        return None;
    }
    let (severity, threshold) = match critical {
        Some(critical) if value > critical => (Severity::Critical, critical),
        _ => (Severity::Warning, max),
    };
    Some(issue(
        severity,
        component,
        metric,
        format!("{} {} {:.3} exceeds {:.3}", component, metric, value, threshold),
        value,
        threshold,
    ))
}

// =============================================================================
// Monitor
// =============================================================================

type AlertCallback = Arc<dyn Fn(&HealthReport) + Send + Sync>;

/// Health monitor for one [`CacheBackend`]
pub struct CacheHealthMonitor {
    backend: Arc<CacheBackend>,
    thresholds: HealthThresholds,
    callbacks: RwLock<Vec<AlertCallback>>,
    last_report: RwLock<Option<HealthReport>>,
}

impl std::fmt::Debug for CacheHealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHealthMonitor")
            .field("thresholds", &self.thresholds)
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

impl CacheHealthMonitor {
    /// Monitor with default thresholds
    pub fn new(backend: Arc<CacheBackend>) -> Self {
        Self::with_thresholds(backend, HealthThresholds::default())
    }

    pub fn with_thresholds(backend: Arc<CacheBackend>, thresholds: HealthThresholds) -> Self {
        Self {
            backend,
            thresholds,
            callbacks: RwLock::new(Vec::new()),
            last_report: RwLock::new(None),
        }
    }

    pub fn backend(&self) -> &Arc<CacheBackend> {
        &self.backend
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Register a callback run on every degraded report
    pub fn add_alert_callback<F>(&self, callback: F)
    where
        F: Fn(&HealthReport) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// The report produced by the most recent check
    pub fn get_last_report(&self) -> Option<HealthReport> {
        self.last_report.read().clone()
    }

    /// Evaluate current metrics against the thresholds
    pub fn check_health(&self) -> HealthReport {
        let t = &self.thresholds;
        let metrics = self.backend.metrics();
        let snapshot = metrics.snapshot();
        let disk_usage = self.backend.l2_disk_usage();
        let mut issues = Vec::new();

        if snapshot.requests > 0 {
            issues.extend(check_min(
                "overall",
                "hit_rate",
                snapshot.hit_rate,
                t.min_hit_rate,
                Some(t.critical_hit_rate),
            ));
        }

        if metrics.has_activity() {
            issues.extend(check_max(
                "overall",
                "error_rate",
                snapshot.error_rate,
                t.max_error_rate,
                Some(t.critical_error_rate),
            ));
        }

        if let Some(p99) = metrics.latency(CacheTier::L1, Operation::Get).percentile(99.0) {
            issues.extend(check_max(
                "l1",
                "p99_latency_ms",
                p99,
                t.max_l1_p99_ms,
                Some(t.max_l1_p99_ms * t.critical_latency_factor),
            ));
        }

        if self.backend.has_l2() {
            if let Some(p99) = metrics.latency(CacheTier::L2, Operation::Get).percentile(99.0) {
                issues.extend(check_max(
                    "l2",
                    "p99_latency_ms",
                    p99,
                    t.max_l2_p99_ms,
                    Some(t.max_l2_p99_ms * t.critical_latency_factor),
                ));
            }

            if metrics.tier_lookups(CacheTier::L2) > 0 {
                issues.extend(check_min(
                    "l2",
                    "hit_rate",
                    metrics.tier_hit_rate(CacheTier::L2),
                    t.min_l2_hit_rate,
                    None,
                ));
            }
        }

        if let Some(usage) = disk_usage {
            issues.extend(check_max(
                "l2",
                "disk_usage",
                usage,
                t.max_disk_usage,
                Some(t.critical_disk_usage),
            ));
        }

        let status = if issues.iter().any(|i| i.severity == Severity::Critical) {
            HealthStatus::Critical
        } else if !issues.is_empty() {
            HealthStatus::Warning
        } else if !metrics.has_activity() {
            HealthStatus::Unknown
        } else {
            HealthStatus::Healthy
        };

        let report = HealthReport {
            status,
            issues,
            metrics: snapshot,
            disk_usage,
            timestamp: Utc::now(),
        };

        if report.is_degraded() {
            for issue in &report.issues {
                warn!("Cache health {}: {}", report.status, issue.message);
            }
            // Callbacks run unlocked so they may register further callbacks
            let callbacks: Vec<AlertCallback> = self.callbacks.read().clone();
            for callback in callbacks {
                callback(&report);
            }
        } else {
            debug!("Cache health {}", report.status);
        }

        *self.last_report.write() = Some(report.clone());
        report
    }

    /// Check health every `interval` until `shutdown` is cancelled
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Health monitor polling every {:?}", interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Health monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_health();
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
