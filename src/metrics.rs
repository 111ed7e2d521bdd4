//! Query Metrics
//!
//! Query counters and latency tracking.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub ok: u64,
    pub failed: u64,
}

/// Metrics collector shared by concurrent queries
#[derive(Debug)]
pub struct QueryMetrics {
    total_queries: AtomicU64,
    failed_queries: AtomicU64,
    by_operation: DashMap<&'static str, OpCounts>,

    latency_sum_us: AtomicU64,
    latency_min_us: AtomicU64,
    latency_max_us: AtomicU64,
}

impl Default for QueryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            by_operation: DashMap::new(),
            latency_sum_us: AtomicU64::new(0),
            latency_min_us: AtomicU64::new(u64::MAX),
            latency_max_us: AtomicU64::new(0),
        }
    }

    /// Record one finished query
    pub fn record(&self, operation: &'static str, latency: Duration, ok: bool) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut counts = self.by_operation.entry(operation).or_default();
            if ok {
                counts.ok += 1;
            } else {
                counts.failed += 1;
            }
        }

        let latency_us = latency.as_micros() as u64;
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_min_us.fetch_min(latency_us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries.load(Ordering::Relaxed)
    }

    pub fn failed_queries(&self) -> u64 {
        self.failed_queries.load(Ordering::Relaxed)
    }

    /// Counters for one operation
    pub fn operation(&self, operation: &str) -> OpCounts {
        self.by_operation
            .get(operation)
            .map(|c| *c)
            .unwrap_or_default()
    }

    /// Average latency in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        let count = self.total_queries();
        if count == 0 {
            return 0.0;
        }
        self.latency_sum_us.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn min_latency_us(&self) -> u64 {
        match self.latency_min_us.load(Ordering::Relaxed) {
            u64::MAX => 0,
            min => min,
        }
    }

    pub fn max_latency_us(&self) -> u64 {
        self.latency_max_us.load(Ordering::Relaxed)
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        let mut ops: Vec<String> = self
            .by_operation
            .iter()
            .map(|e| format!("{}={}/{}", e.key(), e.ok, e.failed))
            .collect();
        ops.sort();
        format!(
            "Queries: {} ({} failed) [{}] | Latency (µs): avg={:.1}, min={}, max={}",
            self.total_queries(),
            self.failed_queries(),
            ops.join(" "),
            self.avg_latency_us(),
            self.min_latency_us(),
            self.max_latency_us()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = QueryMetrics::new();

        metrics.record("neighbors", Duration::from_micros(100), true);
        metrics.record("neighbors", Duration::from_micros(200), false);
        metrics.record("analogy", Duration::from_micros(150), true);

        assert_eq!(metrics.total_queries(), 3);
        assert_eq!(metrics.failed_queries(), 1);
        assert_eq!(metrics.min_latency_us(), 100);
        assert_eq!(metrics.max_latency_us(), 200);
        assert!((metrics.avg_latency_us() - 150.0).abs() < 0.1);

        assert_eq!(metrics.operation("neighbors"), OpCounts { ok: 1, failed: 1 });
        assert_eq!(metrics.operation("analogy"), OpCounts { ok: 1, failed: 0 });
        assert_eq!(metrics.operation("vector"), OpCounts::default());
    }

    #[test]
    fn test_empty_summary() {
        let metrics = QueryMetrics::new();
        assert_eq!(metrics.min_latency_us(), 0);
        assert_eq!(
            metrics.summary(),
            "Queries: 0 (0 failed) [] | Latency (µs): avg=0.0, min=0, max=0"
        );
    }
}
