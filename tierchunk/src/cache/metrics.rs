//! Chunk cache counters.
//!
//! Every counter is monotonic for the lifetime of the process. Values are
//! read by name, so a monitoring exporter can walk [`CacheMetrics::NAMES`]
//! without knowing the struct layout.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Logical name the counters are published under.
pub const METRIC_GROUP: &str = "tieredstorage.cache:type=chunk-cache";

pub const CACHE_HITS: &str = "cache-hits-total";
pub const CACHE_MISSES: &str = "cache-misses-total";
pub const CACHE_LOAD_SUCCESS: &str = "cache-load-success-total";
pub const CACHE_LOAD_SUCCESS_TIME: &str = "cache-load-success-time-total";
pub const CACHE_LOAD_FAILURE: &str = "cache-load-failure-total";
pub const CACHE_LOAD_FAILURE_TIME: &str = "cache-load-failure-time-total";
pub const CACHE_EVICTION: &str = "cache-eviction-total";
pub const CACHE_EVICTION_WEIGHT: &str = "cache-eviction-weight-total";

#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    load_success: AtomicU64,
    load_success_time_ns: AtomicU64,
    load_failure: AtomicU64,
    load_failure_time_ns: AtomicU64,
    evictions: AtomicU64,
    eviction_weight: AtomicU64,
}

impl CacheMetrics {
    pub const NAMES: [&'static str; 8] = [
        CACHE_HITS,
        CACHE_MISSES,
        CACHE_LOAD_SUCCESS,
        CACHE_LOAD_SUCCESS_TIME,
        CACHE_LOAD_FAILURE,
        CACHE_LOAD_FAILURE_TIME,
        CACHE_EVICTION,
        CACHE_EVICTION_WEIGHT,
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self) -> &'static str {
        METRIC_GROUP
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_success(&self, elapsed: Duration) {
        self.load_success.fetch_add(1, Ordering::Relaxed);
        self.load_success_time_ns
            .fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_load_failure(&self, elapsed: Duration) {
        self.load_failure.fetch_add(1, Ordering::Relaxed);
        self.load_failure_time_ns
            .fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_eviction(&self, weight: u32) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.eviction_weight
            .fetch_add(weight as u64, Ordering::Relaxed);
    }

    /// Current value of the counter called `name`; time totals are in
    /// nanoseconds.
    pub fn value(&self, name: &str) -> Option<f64> {
        let counter = match name {
            CACHE_HITS => &self.hits,
            CACHE_MISSES => &self.misses,
            CACHE_LOAD_SUCCESS => &self.load_success,
            CACHE_LOAD_SUCCESS_TIME => &self.load_success_time_ns,
            CACHE_LOAD_FAILURE => &self.load_failure,
            CACHE_LOAD_FAILURE_TIME => &self.load_failure_time_ns,
            CACHE_EVICTION => &self.evictions,
            CACHE_EVICTION_WEIGHT => &self.eviction_weight,
            _ => return None,
        };
        Some(counter.load(Ordering::Relaxed) as f64)
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, f64> {
        Self::NAMES
            .iter()
            .filter_map(|name| self.value(name).map(|v| (*name, v)))
            .collect()
    }
}

fn nanos(elapsed: Duration) -> u64 {
    // a recorded load always counts for at least one tick
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_by_name() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_miss();
        metrics.record_load_success(Duration::from_millis(2));
        metrics.record_load_failure(Duration::ZERO);
        metrics.record_eviction(10);

        assert_eq!(metrics.value(CACHE_HITS), Some(1.0));
        assert_eq!(metrics.value(CACHE_MISSES), Some(2.0));
        assert_eq!(metrics.value(CACHE_LOAD_SUCCESS_TIME), Some(2_000_000.0));
        assert_eq!(metrics.value(CACHE_LOAD_FAILURE), Some(1.0));
        assert_eq!(metrics.value(CACHE_LOAD_FAILURE_TIME), Some(1.0));
        assert_eq!(metrics.value(CACHE_EVICTION_WEIGHT), Some(10.0));
        assert_eq!(metrics.value("cache-unknown"), None);
        assert_eq!(metrics.snapshot().len(), 8);
        assert_eq!(metrics.group(), "tieredstorage.cache:type=chunk-cache");
    }
}
