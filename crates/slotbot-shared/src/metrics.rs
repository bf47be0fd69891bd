//! Prometheus metrics for the bot.
//!
//! A `Metrics` value owns its own registry; nothing here is process-global, so
//! tests can build as many independent instances as they like.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::constants::METRICS_PREFIX;
use crate::error::AppError;

const DB_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];
const MESSAGE_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

pub struct Metrics {
    registry: Registry,
    messages_received: IntCounter,
    messages_processed: IntCounter,
    messages_errors: IntCounter,
    message_duration: Histogram,
    bookings_total: IntCounter,
    rate_limit_exceeded: IntCounterVec,
    storage_queries: IntCounterVec,
    storage_errors: IntCounterVec,
    storage_duration: HistogramVec,
}

impl Metrics {
    pub fn new(environment: &str, instance: &str) -> Result<Self, AppError> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| {
            Opts::new(format!("{}{}", METRICS_PREFIX, name), help)
                .const_label("environment", environment)
                .const_label("instance", instance)
        };
        let hist = |name: &str, help: &str, buckets: &[f64]| {
            HistogramOpts::from(opts(name, help)).buckets(buckets.to_vec())
        };

        let messages_received = IntCounter::with_opts(opts("messages_received_total", "Total messages received"))?;
        let messages_processed = IntCounter::with_opts(opts("messages_processed_total", "Total messages processed"))?;
        let messages_errors = IntCounter::with_opts(opts(
            "messages_errors_total",
            "Total errors during message processing",
        ))?;
        let message_duration = Histogram::with_opts(hist(
            "message_processing_duration_seconds",
            "Time spent processing messages",
            MESSAGE_BUCKETS,
        ))?;
        let bookings_total = IntCounter::with_opts(opts("bookings_total", "Total bookings created"))?;
        let rate_limit_exceeded = IntCounterVec::new(
            opts("rate_limit_exceeded_total", "Admissions that had to wait for a token"),
            &["limiter"],
        )?;
        let storage_queries = IntCounterVec::new(
            opts("storage_queries_total", "Total storage operations"),
            &["backend", "operation"],
        )?;
        let storage_errors = IntCounterVec::new(
            opts("storage_errors_total", "Failed storage operations"),
            &["backend", "operation", "kind"],
        )?;
        let storage_duration = HistogramVec::new(
            hist(
                "storage_query_duration_seconds",
                "Time spent on storage operations",
                DB_BUCKETS,
            ),
            &["backend", "operation"],
        )?;
        let up = IntGauge::with_opts(opts("up", "Service health status"))?;
        up.set(1);

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_processed.clone()))?;
        registry.register(Box::new(messages_errors.clone()))?;
        registry.register(Box::new(message_duration.clone()))?;
        registry.register(Box::new(bookings_total.clone()))?;
        registry.register(Box::new(rate_limit_exceeded.clone()))?;
        registry.register(Box::new(storage_queries.clone()))?;
        registry.register(Box::new(storage_errors.clone()))?;
        registry.register(Box::new(storage_duration.clone()))?;
        registry.register(Box::new(up))?;

        Ok(Self {
            registry,
            messages_received,
            messages_processed,
            messages_errors,
            message_duration,
            bookings_total,
            rate_limit_exceeded,
            storage_queries,
            storage_errors,
            storage_duration,
        })
    }

    pub fn inc_messages_received(&self) {
        self.messages_received.inc();
    }

    pub fn inc_messages_processed(&self) {
        self.messages_processed.inc();
    }

    pub fn inc_messages_errors(&self) {
        self.messages_errors.inc();
    }

    pub fn observe_message_duration(&self, seconds: f64) {
        self.message_duration.observe(seconds);
    }

    pub fn inc_bookings_total(&self) {
        self.bookings_total.inc();
    }

    pub fn inc_rate_limit_exceeded(&self, limiter: &str) {
        self.rate_limit_exceeded.with_label_values(&[limiter]).inc();
    }

    pub fn observe_storage(&self, backend: &str, operation: &str, seconds: f64) {
        self.storage_queries.with_label_values(&[backend, operation]).inc();
        self.storage_duration
            .with_label_values(&[backend, operation])
            .observe(seconds);
    }

    pub fn inc_storage_errors(&self, backend: &str, operation: &str, kind: &str) {
        self.storage_errors
            .with_label_values(&[backend, operation, kind])
            .inc();
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.get()
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.get()
    }

    pub fn messages_errors(&self) -> u64 {
        self.messages_errors.get()
    }

    pub fn bookings_created(&self) -> u64 {
        self.bookings_total.get()
    }

    pub fn rate_limit_exceeded(&self, limiter: &str) -> u64 {
        self.rate_limit_exceeded.with_label_values(&[limiter]).get()
    }

    pub fn storage_errors(&self, backend: &str, operation: &str, kind: &str) -> u64 {
        self.storage_errors
            .with_label_values(&[backend, operation, kind])
            .get()
    }

    /// Prometheus text exposition of every registered family.
    pub fn render(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| AppError::InternalError(e.to_string()))
    }
}
