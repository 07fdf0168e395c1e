//! In-process metrics.
//!
//! Counters are cumulative since startup. The worker periodically turns a
//! [`MetricsSnapshot`] into performance samples named `internal.<metric>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const INTERNAL_METRIC_PREFIX: &str = "internal.";

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A value that is overwritten rather than accumulated.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency histogram in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    /// Upper bounds: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_duration(&self, elapsed: Duration) {
        self.observe(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    // Collector
    pub events_received: Counter,
    pub events_tracked: Counter,
    pub events_dropped: Counter,
    pub events_rejected_validation: Counter,
    pub searches_tracked: Counter,
    pub rate_limited_requests: Counter,

    // Admin surface
    pub auth_failures: Counter,
    pub export_requests: Counter,
    pub exports_truncated: Counter,

    // Aggregation
    pub aggregation_runs: Counter,
    pub aggregation_entity_failures: Gauge,

    pub collector_latency_ms: Histogram,
    pub query_latency_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, timestamp: DateTime<Utc>) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp,
            events_received: self.events_received.get(),
            events_tracked: self.events_tracked.get(),
            events_dropped: self.events_dropped.get(),
            events_rejected_validation: self.events_rejected_validation.get(),
            searches_tracked: self.searches_tracked.get(),
            rate_limited_requests: self.rate_limited_requests.get(),
            auth_failures: self.auth_failures.get(),
            export_requests: self.export_requests.get(),
            exports_truncated: self.exports_truncated.get(),
            aggregation_runs: self.aggregation_runs.get(),
            aggregation_entity_failures: self.aggregation_entity_failures.get(),
            collector_latency_mean_ms: self.collector_latency_ms.mean(),
            query_latency_mean_ms: self.query_latency_ms.mean(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub events_received: u64,
    pub events_tracked: u64,
    pub events_dropped: u64,
    pub events_rejected_validation: u64,
    pub searches_tracked: u64,
    pub rate_limited_requests: u64,
    pub auth_failures: u64,
    pub export_requests: u64,
    pub exports_truncated: u64,
    pub aggregation_runs: u64,
    pub aggregation_entity_failures: u64,
    pub collector_latency_mean_ms: f64,
    pub query_latency_mean_ms: f64,
}

impl MetricsSnapshot {
    /// Flattens the snapshot into `(internal.<name>, value)` pairs.
    pub fn samples(&self) -> Vec<(String, f64)> {
        let values: [(&str, f64); 13] = [
            ("events_received", self.events_received as f64),
            ("events_tracked", self.events_tracked as f64),
            ("events_dropped", self.events_dropped as f64),
            ("events_rejected_validation", self.events_rejected_validation as f64),
            ("searches_tracked", self.searches_tracked as f64),
            ("rate_limited_requests", self.rate_limited_requests as f64),
            ("auth_failures", self.auth_failures as f64),
            ("export_requests", self.export_requests as f64),
            ("exports_truncated", self.exports_truncated as f64),
            ("aggregation_runs", self.aggregation_runs as f64),
            ("aggregation_entity_failures", self.aggregation_entity_failures as f64),
            ("collector_latency_ms", self.collector_latency_mean_ms),
            ("query_latency_ms", self.query_latency_mean_ms),
        ];
        values
            .into_iter()
            .map(|(name, value)| (format!("{INTERNAL_METRIC_PREFIX}{name}"), value))
            .collect()
    }
}

pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

pub fn metrics() -> &'static Metrics {
    &METRICS
}
