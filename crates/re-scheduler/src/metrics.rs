//! Process-wide scheduler metrics: total in-flight executions across all
//! workers, and the dispatch queue's current depth. Registered once against
//! `prometheus`'s default registry, alongside `re_core::metrics`'s cache
//! counters.

use prometheus::IntGauge;
use std::sync::OnceLock;

pub struct SchedulerMetrics {
    pub worker_in_flight: IntGauge,
    pub queue_depth: IntGauge,
}

impl SchedulerMetrics {
    fn new() -> Self {
        let worker_in_flight = IntGauge::new(
            "re_scheduler_worker_in_flight",
            "Executions currently in flight across all workers",
        )
        .expect("static metric options are valid");
        prometheus::register(Box::new(worker_in_flight.clone()))
            .expect("metric registered exactly once");

        let queue_depth = IntGauge::new(
            "re_scheduler_queue_depth",
            "Tasks currently waiting in the dispatch queue",
        )
        .expect("static metric options are valid");
        prometheus::register(Box::new(queue_depth.clone()))
            .expect("metric registered exactly once");

        Self {
            worker_in_flight,
            queue_depth,
        }
    }
}

static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// The process-wide scheduler metrics, created and registered on first use.
pub fn scheduler_metrics() -> &'static SchedulerMetrics {
    SCHEDULER_METRICS.get_or_init(SchedulerMetrics::new)
}
