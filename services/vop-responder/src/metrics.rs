use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry, Encoder, Histogram,
    HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub struct Metrics {
    pub registry: Registry,
    pub verifications_total: IntCounterVec,
    pub match_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let verifications_total = register_int_counter_vec_with_registry!(
            Opts::new(
                "vop_responder_verifications_total",
                "Total verification requests by outcome"
            ),
            &["status", "reason_code"],
            registry
        )?;

        let match_duration_seconds = register_histogram_with_registry!(
            HistogramOpts::new(
                "vop_responder_match_duration_seconds",
                "Name matching duration in seconds"
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
            registry
        )?;

        Ok(Self {
            registry,
            verifications_total,
            match_duration_seconds,
        })
    }

    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));
