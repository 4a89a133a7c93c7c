//! Prometheus metrics for the job runtime, behind the `metrics` feature.
//!
//! A `Registry`-scoped struct of named counters/gauges/histograms built
//! with the `register_*_with_registry!` macros; construction failures are
//! unwrapped since registration only fails on a duplicate metric name,
//! which is a programmer error.

#![cfg(feature = "metrics")]

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts,
    Registry,
};

/// Job-runtime metrics, one instance shared across the worker's claim loop
/// and every stage it dispatches.
#[derive(Clone)]
pub struct JobMetrics {
    pub claimed: IntCounterVec,
    pub succeeded: IntCounterVec,
    pub failed: IntCounterVec,
    pub retried: IntCounterVec,
    pub canceled: IntCounterVec,
    pub suspended: IntCounterVec,
    pub in_flight: IntGauge,
    pub stage_duration_seconds: Histogram,
}

impl JobMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            claimed: register_int_counter_vec_with_registry!(
                Opts::new("orchestrator_jobs_claimed_total", "Jobs claimed by a worker"),
                &["job_type"],
                registry
            )
            .unwrap(),
            succeeded: register_int_counter_vec_with_registry!(
                Opts::new("orchestrator_jobs_succeeded_total", "Jobs that reached succeeded"),
                &["job_type"],
                registry
            )
            .unwrap(),
            failed: register_int_counter_vec_with_registry!(
                Opts::new("orchestrator_jobs_failed_total", "Jobs that reached failed (terminal)"),
                &["job_type"],
                registry
            )
            .unwrap(),
            retried: register_int_counter_vec_with_registry!(
                Opts::new("orchestrator_jobs_retried_total", "Jobs requeued after a failed attempt"),
                &["job_type"],
                registry
            )
            .unwrap(),
            canceled: register_int_counter_vec_with_registry!(
                Opts::new("orchestrator_jobs_canceled_total", "Jobs canceled"),
                &["job_type"],
                registry
            )
            .unwrap(),
            suspended: register_int_counter_vec_with_registry!(
                Opts::new("orchestrator_jobs_suspended_total", "Jobs suspended to waiting_user"),
                &["job_type"],
                registry
            )
            .unwrap(),
            in_flight: register_int_gauge_with_registry!(
                Opts::new("orchestrator_jobs_in_flight", "Jobs currently running on this worker"),
                registry
            )
            .unwrap(),
            stage_duration_seconds: register_histogram_with_registry!(
                HistogramOpts::new("orchestrator_stage_duration_seconds", "Stage execution wall time")
                    .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
                registry
            )
            .unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_per_job_type() {
        let registry = Registry::new();
        let metrics = JobMetrics::new(&registry);

        metrics.claimed.with_label_values(&["ingest_chunks"]).inc();
        metrics.claimed.with_label_values(&["ingest_chunks"]).inc();
        metrics.claimed.with_label_values(&["embed_chunks"]).inc();

        assert_eq!(metrics.claimed.with_label_values(&["ingest_chunks"]).get(), 2);
        assert_eq!(metrics.claimed.with_label_values(&["embed_chunks"]).get(), 1);
    }

    #[test]
    fn in_flight_gauge_tracks_concurrency() {
        let registry = Registry::new();
        let metrics = JobMetrics::new(&registry);

        metrics.in_flight.inc();
        metrics.in_flight.inc();
        metrics.in_flight.dec();
        assert_eq!(metrics.in_flight.get(), 1);
    }
}
