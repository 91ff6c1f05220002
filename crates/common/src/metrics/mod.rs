//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Doc-Talk metrics
pub const METRICS_PREFIX: &str = "doctalk";

/// Buckets for chat model latency (seconds); answers span several calls
pub const LLM_BUCKETS: &[f64] = &[
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 60s
];

/// Buckets for embedding latency
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total documents indexed"
    );

    describe_counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks created"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Document ingestion latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Chat model metrics
    describe_counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total chat completion requests"
    );

    describe_histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Chat completion latency in seconds"
    );

    // Conversation metrics
    describe_counter!(
        format!("{}_chat_turns_total", METRICS_PREFIX),
        Unit::Count,
        "Total answered questions"
    );

    describe_histogram!(
        format!("{}_retrieved_chunks", METRICS_PREFIX),
        Unit::Count,
        "Chunks retrieved per question"
    );

    describe_gauge!(
        format!("{}_sessions_active", METRICS_PREFIX),
        Unit::Count,
        "Live sessions"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
        tracing::trace!(model, batch_size, duration_secs, "Embedding batch recorded");
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record chat model metrics
pub fn record_llm(duration_secs: f64, model: &str, stage: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "stage" => stage.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string(),
        "stage" => stage.to_string()
    )
    .record(duration_secs);
}

/// Helper to record ingestion metrics
pub fn record_ingestion(duration_secs: f64, chunks_created: usize) {
    counter!(format!("{}_documents_ingested_total", METRICS_PREFIX)).increment(1);

    counter!(format!("{}_chunks_created_total", METRICS_PREFIX))
        .increment(chunks_created as u64);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record an answered question
pub fn record_chat_turn(chain_type: &str, retrieved: usize) {
    counter!(
        format!("{}_chat_turns_total", METRICS_PREFIX),
        "chain_type" => chain_type.to_string()
    )
    .increment(1);

    histogram!(format!("{}_retrieved_chunks", METRICS_PREFIX)).record(retrieved as f64);
}

/// Helper to publish the live session count
pub fn set_active_sessions(count: usize) {
    gauge!(format!("{}_sessions_active", METRICS_PREFIX)).set(count as f64);
}
