//! The metrics collaborator: per-priority job throughput counters and
//! histograms, plus lock-free queue reclamation counters, recorded through
//! the `metrics` facade rather than owned storage.

use metrics::counter;
use metrics::gauge;
use metrics::histogram;
use metrics::SharedString;
use metrics_exporter_prometheus::BuildError;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::PrometheusConfig;

/// Installs the process-wide Prometheus recorder and HTTP listener.
/// Embedders call this once; every [`Metrics`] instance created afterwards
/// records into the same global recorder.
pub fn install_prometheus_exporter(config: &PrometheusConfig) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.port))
        .install()
}

pub struct Metrics {}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {}
    }

    pub fn increment_jobs_received(&self, priority: &str) {
        let priority = SharedString::from(String::from(priority));
        counter!("queue_engine_jobs_received_total", "priority" => priority).increment(1);
    }

    pub fn increment_jobs_completed(&self, priority: &str) {
        let priority = SharedString::from(String::from(priority));
        counter!("queue_engine_jobs_completed_total", "priority" => priority).increment(1);
    }

    pub fn increment_jobs_failed(&self, priority: &str) {
        let priority = SharedString::from(String::from(priority));
        counter!("queue_engine_jobs_failed_total", "priority" => priority).increment(1);
    }

    pub fn observe_job_duration(&self, priority: &str, duration: f64) {
        let priority = SharedString::from(String::from(priority));
        histogram!("queue_engine_job_duration_seconds", "priority" => priority).record(duration);
    }

    pub fn set_queue_depth(&self, priority: &str, depth: f64) {
        let priority = SharedString::from(String::from(priority));
        gauge!("queue_engine_queue_depth", "priority" => priority).set(depth);
    }

    pub fn increment_retired_nodes(&self, count: u64) {
        counter!("queue_engine_lockfree_retired_nodes_total").increment(count);
    }

    pub fn increment_reclaimed_nodes(&self, count: u64) {
        counter!("queue_engine_lockfree_reclaimed_nodes_total").increment(count);
    }

    pub fn increment_worker_count(&self) {
        gauge!("queue_engine_worker_count").increment(1);
    }
}
