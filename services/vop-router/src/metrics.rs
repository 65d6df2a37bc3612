// Prometheus metrics for the VoP router.
// The orchestrator is the only component that records the terminal
// per-request outcome; other components record their own latencies.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec_with_registry, register_histogram_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub struct Metrics {
    pub registry: Registry,

    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub active_requests: IntGauge,

    pub responder_latency_seconds: HistogramVec,
    pub directory_lookup_duration_seconds: Histogram,

    pub rate_limit_hits_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub match_status_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = register_int_counter_vec_with_registry!(
            Opts::new("vop_router_requests_total", "Total number of VoP requests"),
            &["status", "requester_bic", "responder_bic"],
            registry
        )?;

        let request_duration_seconds = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "vop_router_request_duration_seconds",
                "VoP request duration in seconds"
            )
            .buckets(vec![0.1, 0.3, 0.5, 1.0, 3.0, 5.0, 10.0]),
            &["status", "requester_bic", "responder_bic"],
            registry
        )?;

        let active_requests = register_int_gauge_with_registry!(
            Opts::new("vop_router_active_requests", "Number of active VoP requests"),
            registry
        )?;

        let responder_latency_seconds = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "vop_router_responder_latency_seconds",
                "Responder response time in seconds"
            )
            .buckets(vec![0.1, 0.3, 0.5, 1.0, 2.0, 3.0, 5.0]),
            &["responder_bic", "status"],
            registry
        )?;

        let directory_lookup_duration_seconds = register_histogram_with_registry!(
            HistogramOpts::new(
                "vop_router_directory_lookup_duration_seconds",
                "Directory lookup duration in seconds"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            registry
        )?;

        let rate_limit_hits_total = register_int_counter_vec_with_registry!(
            Opts::new(
                "vop_router_rate_limit_hits_total",
                "Total number of rate limit hits"
            ),
            &["requester_bic"],
            registry
        )?;

        let errors_total = register_int_counter_vec_with_registry!(
            Opts::new("vop_router_errors_total", "Total number of errors"),
            &["type", "requester_bic"],
            registry
        )?;

        let match_status_total = register_int_counter_vec_with_registry!(
            Opts::new(
                "vop_router_match_status_total",
                "Distribution of match statuses"
            ),
            &["status", "responder_bic"],
            registry
        )?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            active_requests,
            responder_latency_seconds,
            directory_lookup_duration_seconds,
            rate_limit_hits_total,
            errors_total,
            match_status_total,
        })
    }

    /// Export all metrics in Prometheus text format.
    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

// Global metrics instance
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});
