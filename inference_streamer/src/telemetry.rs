use opentelemetry::{
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to build metrics exporter: {0}")]
    Exporter(String),
    #[error("Failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
}

pub struct Metrics {
    frames_sent: Counter<u64>,
    results: Counter<u64>,
    result_latency: Histogram<u64>,
    // instruments go quiet once the provider is dropped
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();
        let meter = provider.meter("inference_streamer");

        let frames_sent = meter
            .u64_counter("frames_sent_total")
            .with_description("Frames submitted to the inference pipeline")
            .build();

        let results = meter
            .u64_counter("results_total")
            .with_description("Inference results received, by outcome")
            .build();

        let boundaries = generate_boundaries((5, 25, 65, 505, 2005));

        let result_latency = meter
            .u64_histogram("result_latency_ms")
            .with_boundaries(boundaries)
            .with_description("Time from frame submission to result delivery in milliseconds")
            .build();

        Ok(Metrics {
            frames_sent,
            results,
            result_latency,
            _provider: provider,
            registry,
        })
    }

    pub fn record_frame_sent(&self, model: &str) {
        let attributes = vec![KeyValue::new("model", model.to_string())];
        self.frames_sent.add(1, &attributes);
    }

    pub fn record_result(&self, model: &str, outcome: &'static str, latency_ms: u64) {
        let attributes = vec![
            KeyValue::new("model", model.to_string()),
            KeyValue::new("outcome", outcome),
        ];
        self.results.add(1, &attributes);
        self.result_latency.record(latency_ms, &attributes);
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 10;
    let end_step: usize = 40;
    let tail_step: usize = 500;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
