//! Prometheus metrics for the adapter.
//!
//! All metrics hang off a single [`Metrics`] handle owning its own
//! registry. The handle is constructed once at process start and cloned
//! into every component that records observations; there is no module-level
//! mutable registry.

use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

const NAMESPACE: &str = "music_adapter";

/// Injected metrics sink shared by all components
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Messages processed end to end, by terminal status (ok/error)
    pub messages_total: CounterVec,

    /// End-to-end processing latency, receipt to acknowledgment
    pub message_processing_seconds: Histogram,

    /// Outbound service calls, by service and outcome
    pub requests_total: CounterVec,

    /// Outbound call latency by service; retries are internal to one observation
    pub request_latency_seconds: HistogramVec,

    /// Dead-lettered deliveries by failing pipeline stage
    pub dead_letters_total: CounterVec,

    /// Broker reconnect attempts triggered by unexpected connection loss
    pub broker_reconnects_total: IntCounter,
}

impl Metrics {
    /// Create the sink and register every metric with its registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages_total = CounterVec::new(
            Opts::new("messages_total", "Total messages processed").namespace(NAMESPACE),
            &["status"],
        )?;

        let message_processing_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "message_processing_seconds",
                "End-to-end processing time for one message",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        let requests_total = CounterVec::new(
            Opts::new("request_total", "Number of calls to external services")
                .namespace(NAMESPACE),
            &["service", "outcome"],
        )?;

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new("request_latency_seconds", "Latency of external requests")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["service"],
        )?;

        let dead_letters_total = CounterVec::new(
            Opts::new("dead_letters_total", "Deliveries routed to the dead-letter queue")
                .namespace(NAMESPACE),
            &["stage"],
        )?;

        let broker_reconnects_total = IntCounter::with_opts(
            Opts::new("broker_reconnects_total", "Broker reconnect attempts")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(message_processing_seconds.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_latency_seconds.clone()))?;
        registry.register(Box::new(dead_letters_total.clone()))?;
        registry.register(Box::new(broker_reconnects_total.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            message_processing_seconds,
            requests_total,
            request_latency_seconds,
            dead_letters_total,
            broker_reconnects_total,
        })
    }

    /// Record one logical outbound call
    pub fn record_request(&self, service: &str, outcome: &str, latency: Duration) {
        self.requests_total
            .with_label_values(&[service, outcome])
            .inc();
        self.request_latency_seconds
            .with_label_values(&[service])
            .observe(latency.as_secs_f64());
    }

    /// Record a call rejected before any network attempt.
    ///
    /// Counts only; no latency observation, so fail-fast rejections do
    /// not skew the latency histogram toward zero during an outage.
    pub fn record_rejection(&self, service: &str, outcome: &str) {
        self.requests_total
            .with_label_values(&[service, outcome])
            .inc();
    }

    /// Record a fully processed (acknowledged) message
    pub fn record_message_ok(&self, latency: Duration) {
        self.messages_total.with_label_values(&["ok"]).inc();
        self.message_processing_seconds
            .observe(latency.as_secs_f64());
    }

    /// Record a dead-lettered message
    pub fn record_message_failed(&self, stage: &str) {
        self.messages_total.with_label_values(&["error"]).inc();
        self.dead_letters_total.with_label_values(&[stage]).inc();
    }

    /// Export all metrics in Prometheus text exposition format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("failed to encode metrics: {}", e);
            return String::from("# error encoding metrics\n");
        }

        String::from_utf8(buffer).unwrap_or_else(|e| {
            tracing::error!("failed to convert metrics to string: {}", e);
            String::from("# error converting metrics\n")
        })
    }
}
