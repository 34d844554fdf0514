//! Process-wide cache metrics: hits, misses, and evictions per tier.
//! Registered once against `prometheus`'s default registry so
//! `prometheus::gather()` (the `/metrics` handler) always has something to
//! report, even before the first request.

use prometheus::{CounterVec, Opts};
use std::sync::OnceLock;

pub struct CacheMetrics {
    hits: CounterVec,
    misses: CounterVec,
    evictions: CounterVec,
}

impl CacheMetrics {
    fn new() -> Self {
        let hits = CounterVec::new(
            Opts::new("re_cache_hits_total", "Cache hits, by tier"),
            &["tier"],
        )
        .expect("static metric options are valid");
        prometheus::register(Box::new(hits.clone())).expect("metric registered exactly once");

        let misses = CounterVec::new(
            Opts::new("re_cache_misses_total", "Cache misses, by tier"),
            &["tier"],
        )
        .expect("static metric options are valid");
        prometheus::register(Box::new(misses.clone())).expect("metric registered exactly once");

        let evictions = CounterVec::new(
            Opts::new("re_cache_evictions_total", "Cache evictions, by tier"),
            &["tier"],
        )
        .expect("static metric options are valid");
        prometheus::register(Box::new(evictions.clone()))
            .expect("metric registered exactly once");

        Self {
            hits,
            misses,
            evictions,
        }
    }

    pub fn record_hit(&self, tier: &str) {
        self.hits.with_label_values(&[tier]).inc();
    }

    pub fn record_miss(&self, tier: &str) {
        self.misses.with_label_values(&[tier]).inc();
    }

    pub fn record_eviction(&self, tier: &str) {
        self.evictions.with_label_values(&[tier]).inc();
    }
}

static CACHE_METRICS: OnceLock<CacheMetrics> = OnceLock::new();

/// The process-wide cache metrics, created and registered on first use.
pub fn cache_metrics() -> &'static CacheMetrics {
    CACHE_METRICS.get_or_init(CacheMetrics::new)
}
