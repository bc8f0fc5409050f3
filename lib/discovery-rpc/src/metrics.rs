//! Instrumentation sink and its Prometheus implementation

use anyhow::Result;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Receives one call count and one latency observation per registry operation
pub trait InstrumentationSink: Send + Sync {
    /// Count one invocation of `operation`
    fn record_call(&self, operation: &str);

    /// Record how long `operation` took, in microseconds
    fn observe_latency(&self, operation: &str, micros: f64);
}

/// Prometheus metrics for registry operations
pub struct DiscoveryMetrics {
    /// Number of times each operation was invoked
    pub usage_total: CounterVec,
    /// Operation latency in microseconds
    pub response_time_microseconds: HistogramVec,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl DiscoveryMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let usage_total = CounterVec::new(
            Opts::new("discovery_usage_total", "Number of times endpoints has been invoked"),
            &["method"],
        )?;

        // 50us .. ~1.6s
        let response_time_microseconds = HistogramVec::new(
            HistogramOpts::new(
                "discovery_response_time_microseconds",
                "Response time of endpoints in microseconds",
            )
            .buckets(exponential_buckets(50.0, 2.0, 16)?),
            &["method"],
        )?;

        registry.register(Box::new(usage_total.clone()))?;
        registry.register(Box::new(response_time_microseconds.clone()))?;

        Ok(Self {
            usage_total,
            response_time_microseconds,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl InstrumentationSink for DiscoveryMetrics {
    fn record_call(&self, operation: &str) {
        self.usage_total.with_label_values(&[operation]).inc();
    }

    fn observe_latency(&self, operation: &str, micros: f64) {
        self.response_time_microseconds
            .with_label_values(&[operation])
            .observe(micros);
    }
}

/// Sink that drops everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl InstrumentationSink for NoopSink {
    fn record_call(&self, _operation: &str) {}

    fn observe_latency(&self, _operation: &str, _micros: f64) {}
}

/// Sink that keeps observations in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    calls: Mutex<HashMap<String, u64>>,
    latencies: Mutex<HashMap<String, Vec<f64>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded calls of `operation`
    pub fn calls(&self, operation: &str) -> u64 {
        self.calls
            .lock()
            .ok()
            .and_then(|c| c.get(operation).copied())
            .unwrap_or(0)
    }

    /// Recorded latencies of `operation`
    pub fn latencies(&self, operation: &str) -> Vec<f64> {
        self.latencies
            .lock()
            .ok()
            .and_then(|l| l.get(operation).cloned())
            .unwrap_or_default()
    }
}

impl InstrumentationSink for MemorySink {
    fn record_call(&self, operation: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation.to_string()).or_insert(0) += 1;
        }
    }

    fn observe_latency(&self, operation: &str, micros: f64) {
        if let Ok(mut latencies) = self.latencies.lock() {
            latencies
                .entry(operation.to_string())
                .or_default()
                .push(micros);
        }
    }
}
