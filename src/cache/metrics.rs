//! Cache Metrics Collection
//!
//! Per-tier operation counters and rolling latency windows. Counters are
//! atomics and latency windows sit behind their own mutex, so recording
//! from many request threads never loses updates.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::tier::CacheTier;

/// Default number of samples kept per latency window
pub const DEFAULT_LATENCY_CAPACITY: usize = 1000;

/// Cache operation category used for latency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Get,
    Set,
    Delete,
    Clear,
    Evict,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Get,
        Operation::Set,
        Operation::Delete,
        Operation::Clear,
        Operation::Evict,
    ];

    fn index(self) -> usize {
        match self {
            Operation::Get => 0,
            Operation::Set => 1,
            Operation::Delete => 2,
            Operation::Clear => 3,
            Operation::Evict => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Delete => "delete",
            Operation::Clear => "clear",
            Operation::Evict => "evict",
        }
    }
}

// =============================================================================
// Latency Window
// =============================================================================

/// Summary view of a latency window (milliseconds)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Samples currently in the window
    pub count: usize,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Fixed-capacity rolling window of latency samples in milliseconds.
///
/// Once full, each new sample evicts the oldest one, so memory stays
/// bounded regardless of request volume.
#[derive(Debug)]
pub struct LatencyStats {
    samples: Mutex<VecDeque<f64>>,
    capacity: usize,
    /// Samples ever recorded (not bounded by the window)
    recorded: AtomicU64,
}

impl LatencyStats {
    /// Create a window holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            recorded: AtomicU64::new(0),
        }
    }

    /// Record a sample in milliseconds
    pub fn record(&self, millis: f64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(millis);
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duration
    pub fn record_duration(&self, duration: Duration) {
        self.record(duration.as_secs_f64() * 1000.0);
    }

    /// Samples currently held
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples ever recorded
    pub fn total_recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    fn sorted(&self) -> Vec<f64> {
        let mut sorted: Vec<f64> = self.samples.lock().iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted
    }

    /// Nearest-rank percentile (`p` in 0..=100); `None` when empty
    pub fn percentile(&self, p: f64) -> Option<f64> {
        nearest_rank(&self.sorted(), p)
    }

    /// Arithmetic mean; `None` when empty
    pub fn mean(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Population standard deviation; `None` when empty
    pub fn stddev(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Some(variance.sqrt())
    }

    /// Full summary; all zeros when empty
    pub fn summary(&self) -> LatencySummary {
        let sorted = self.sorted();
        if sorted.is_empty() {
            return LatencySummary::default();
        }

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        LatencySummary {
            count: sorted.len(),
            mean,
            stddev: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: nearest_rank(&sorted, 50.0).unwrap_or_default(),
            p95: nearest_rank(&sorted, 95.0).unwrap_or_default(),
            p99: nearest_rank(&sorted, 99.0).unwrap_or_default(),
        }
    }

    /// Drop all samples
    pub fn clear(&self) {
        self.samples.lock().clear();
        self.recorded.store(0, Ordering::Relaxed);
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_CAPACITY)
    }
}

fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 100.0);
    let rank = (p * sorted.len() as f64 / 100.0).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}

// =============================================================================
// Per-tier Metrics
// =============================================================================

/// Counters and latency windows for one tier
#[derive(Debug)]
struct TierMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    latency: [LatencyStats; 5],
}

impl TierMetrics {
    fn new(latency_capacity: usize) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            latency: std::array::from_fn(|_| LatencyStats::new(latency_capacity)),
        }
    }

    fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    fn operations(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
            + self.misses.load(Ordering::Relaxed)
            + self.sets.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
            + self.errors.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> TierSnapshot {
        TierSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            latency: Operation::ALL
                .iter()
                .filter(|op| !self.latency[op.index()].is_empty())
                .map(|op| (op.label().to_string(), self.latency[op.index()].summary()))
                .collect(),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        for window in &self.latency {
            window.clear();
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Cache metrics registry covering both tiers
#[derive(Debug)]
pub struct CacheMetrics {
    l1: TierMetrics,
    l2: TierMetrics,
    /// Backend-level lookups
    requests: AtomicU64,
    /// Lookups that missed every tier
    misses: AtomicU64,
    started: Instant,
}

impl CacheMetrics {
    /// Create a registry with the default latency window size
    pub fn new() -> Self {
        Self::with_latency_capacity(DEFAULT_LATENCY_CAPACITY)
    }

    /// Create a registry with a custom latency window size
    pub fn with_latency_capacity(capacity: usize) -> Self {
        Self {
            l1: TierMetrics::new(capacity),
            l2: TierMetrics::new(capacity),
            requests: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn tier(&self, tier: CacheTier) -> &TierMetrics {
        match tier {
            CacheTier::L1 => &self.l1,
            CacheTier::L2 => &self.l2,
        }
    }

    // Recording

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup that missed every tier
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier_hit(&self, tier: CacheTier) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier_miss(&self, tier: CacheTier) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self, tier: CacheTier) {
        self.tier(tier).sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self, tier: CacheTier) {
        self.tier(tier).deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, tier: CacheTier, count: u64) {
        self.tier(tier).evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self, tier: CacheTier) {
        self.tier(tier).errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, tier: CacheTier, op: Operation, duration: Duration) {
        self.tier(tier).latency[op.index()].record_duration(duration);
    }

    // Reading

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.tier_hits(CacheTier::L1) + self.tier_hits(CacheTier::L2)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn tier_hits(&self, tier: CacheTier) -> u64 {
        self.tier(tier).hits.load(Ordering::Relaxed)
    }

    pub fn tier_misses(&self, tier: CacheTier) -> u64 {
        self.tier(tier).misses.load(Ordering::Relaxed)
    }

    pub fn tier_sets(&self, tier: CacheTier) -> u64 {
        self.tier(tier).sets.load(Ordering::Relaxed)
    }

    pub fn tier_deletes(&self, tier: CacheTier) -> u64 {
        self.tier(tier).deletes.load(Ordering::Relaxed)
    }

    pub fn tier_evictions(&self, tier: CacheTier) -> u64 {
        self.tier(tier).evictions.load(Ordering::Relaxed)
    }

    pub fn tier_errors(&self, tier: CacheTier) -> u64 {
        self.tier(tier).errors.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.tier_errors(CacheTier::L1) + self.tier_errors(CacheTier::L2)
    }

    /// Tier-local hit rate (hits over lookups that reached the tier)
    pub fn tier_hit_rate(&self, tier: CacheTier) -> f64 {
        self.tier(tier).hit_rate()
    }

    /// Lookups that reached the tier
    pub fn tier_lookups(&self, tier: CacheTier) -> u64 {
        self.tier_hits(tier) + self.tier_misses(tier)
    }

    /// Latency window for a tier and operation
    pub fn latency(&self, tier: CacheTier, op: Operation) -> &LatencyStats {
        &self.tier(tier).latency[op.index()]
    }

    /// Overall hit rate across tiers
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            0.0
        } else {
            self.hits() as f64 / requests as f64
        }
    }

    /// Overall miss rate
    pub fn miss_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            0.0
        } else {
            self.misses() as f64 / requests as f64
        }
    }

    /// Failed store operations over all store operations
    pub fn error_rate(&self) -> f64 {
        let operations = self.l1.operations() + self.l2.operations();
        if operations == 0 {
            0.0
        } else {
            self.errors() as f64 / operations as f64
        }
    }

    /// Whether anything has been recorded yet
    pub fn has_activity(&self) -> bool {
        self.l1.operations() + self.l2.operations() > 0
    }

    /// Time since the registry was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests(),
            hits: self.hits(),
            misses: self.misses(),
            errors: self.errors(),
            hit_rate: self.hit_rate(),
            miss_rate: self.miss_rate(),
            error_rate: self.error_rate(),
            uptime_seconds: self.uptime().as_secs(),
            l1: self.l1.snapshot(),
            l2: self.l2.snapshot(),
        }
    }

    /// Human-readable summary suitable for logs
    pub fn get_summary(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(out, "Cache Metrics Summary");
        let _ = writeln!(out, "=====================");
        let _ = writeln!(
            out,
            "Overall: requests={} hits={} misses={} errors={} hit_rate={:.1}% error_rate={:.2}%",
            snapshot.requests,
            snapshot.hits,
            snapshot.misses,
            snapshot.errors,
            snapshot.hit_rate * 100.0,
            snapshot.error_rate * 100.0,
        );

        for (tier, stats) in [(CacheTier::L1, &snapshot.l1), (CacheTier::L2, &snapshot.l2)] {
            let _ = writeln!(
                out,
                "{}: hits={} misses={} sets={} deletes={} evictions={} errors={} hit_rate={:.1}%",
                tier,
                stats.hits,
                stats.misses,
                stats.sets,
                stats.deletes,
                stats.evictions,
                stats.errors,
                stats.hit_rate * 100.0,
            );
            for (op, latency) in &stats.latency {
                let _ = writeln!(
                    out,
                    "  {} latency: p50={:.3}ms p95={:.3}ms p99={:.3}ms mean={:.3}ms (n={})",
                    op, latency.p50, latency.p95, latency.p99, latency.mean, latency.count,
                );
            }
        }

        out
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.l1.reset();
        self.l2.reset();
        self.requests.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one tier's metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub errors: u64,
    pub hit_rate: f64,
    /// Latency summaries keyed by operation label
    pub latency: BTreeMap<String, LatencySummary>,
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub error_rate: f64,
    pub uptime_seconds: u64,
    pub l1: TierSnapshot,
    pub l2: TierSnapshot,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_percentiles() {
        let stats = LatencyStats::new(1000);
        for i in 1..=100 {
            stats.record(i as f64);
        }

        assert_eq!(stats.percentile(50.0), Some(50.0));
        assert_eq!(stats.percentile(95.0), Some(95.0));
        assert_eq!(stats.percentile(99.0), Some(99.0));
        assert_eq!(stats.percentile(100.0), Some(100.0));
        assert_eq!(stats.percentile(0.0), Some(1.0));
        assert_eq!(stats.mean(), Some(50.5));

        let summary = stats.summary();
        assert_eq!(summary.count, 100);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 100.0);
        assert_eq!(summary.p99, 99.0);
    }

    #[test]
    fn test_empty_window() {
        let stats = LatencyStats::default();
        assert_eq!(stats.percentile(50.0), None);
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.stddev(), None);
        assert_eq!(stats.summary(), LatencySummary::default());
    }

    #[test]
    fn test_stddev() {
        let stats = LatencyStats::new(10);
        for s in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.record(s);
        }
        assert!((stats.stddev().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let stats = LatencyStats::new(10);
        for i in 1..=25 {
            stats.record(i as f64);
        }
        assert_eq!(stats.len(), 10);
        assert_eq!(stats.total_recorded(), 25);
        assert_eq!(stats.summary().min, 16.0);
        assert_eq!(stats.summary().max, 25.0);
    }

    #[test]
    fn test_hit_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_request();
        metrics.record_tier_hit(CacheTier::L1);
        metrics.record_request();
        metrics.record_tier_miss(CacheTier::L1);
        metrics.record_tier_hit(CacheTier::L2);
        metrics.record_request();
        metrics.record_tier_miss(CacheTier::L1);
        metrics.record_tier_miss(CacheTier::L2);
        metrics.record_miss();

        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert!((metrics.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.miss_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert!((metrics.tier_hit_rate(CacheTier::L1) - 1.0 / 3.0).abs() < 1e-9);
        assert!((metrics.tier_hit_rate(CacheTier::L2) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_error_rate() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.error_rate(), 0.0);
        assert!(!metrics.has_activity());

        for _ in 0..9 {
            metrics.record_set(CacheTier::L1);
        }
        metrics.record_error(CacheTier::L2);

        assert!((metrics.error_rate() - 0.1).abs() < 1e-9);
        assert!(metrics.has_activity());
    }

    #[test]
    fn test_concurrent_hits_are_not_lost() {
        let metrics = Arc::new(CacheMetrics::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_tier_hit(CacheTier::L1);
                        metrics.record_latency(
                            CacheTier::L1,
                            Operation::Get,
                            Duration::from_micros(5),
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.tier_hits(CacheTier::L1), 1000);
        assert_eq!(
            metrics.latency(CacheTier::L1, Operation::Get).total_recorded(),
            1000
        );
    }

    #[test]
    fn test_snapshot_and_summary() {
        let metrics = CacheMetrics::new();
        metrics.record_request();
        metrics.record_tier_hit(CacheTier::L1);
        metrics.record_latency(CacheTier::L1, Operation::Get, Duration::from_millis(2));
        metrics.record_evictions(CacheTier::L2, 3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.l1.hits, 1);
        assert_eq!(snapshot.l2.evictions, 3);
        assert!(snapshot.l1.latency.contains_key("get"));
        assert!(!snapshot.l1.latency.contains_key("set"));

        let summary = metrics.get_summary();
        assert!(summary.contains("Cache Metrics Summary"));
        assert!(summary.contains("L1 (memory): hits=1"));
        assert!(summary.contains("get latency"));
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_request();
        metrics.record_tier_hit(CacheTier::L1);
        metrics.record_error(CacheTier::L2);
        metrics.record_latency(CacheTier::L2, Operation::Set, Duration::from_millis(1));

        metrics.reset();

        assert_eq!(metrics.requests(), 0);
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.errors(), 0);
        assert!(metrics.latency(CacheTier::L2, Operation::Set).is_empty());
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.elapsed() >= Duration::from_millis(10));
    }
}
