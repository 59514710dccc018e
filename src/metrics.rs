/// Metrics and telemetry for the notification service
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Push attempts by outcome and invalid-token pruning
/// - Inbox writes and dispatches by notification type
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Push sends by outcome (delivered, invalid_token, transient, not_configured)
    pub static ref PUSH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "push_attempts_total",
        "Total number of push send attempts",
        &["outcome"]
    )
    .unwrap();

    /// Tokens deleted after the provider reported them invalid
    pub static ref TOKENS_PRUNED_TOTAL: IntCounter = register_int_counter!(
        "push_tokens_pruned_total",
        "Total number of invalid push tokens pruned"
    )
    .unwrap();

    /// Inbox records written
    pub static ref INBOX_WRITES_TOTAL: IntCounter = register_int_counter!(
        "inbox_writes_total",
        "Total number of inbox notifications written"
    )
    .unwrap();

    /// Per-user dispatches by notification type and result
    pub static ref DISPATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dispatches_total",
        "Total number of per-user notification dispatches",
        &["type", "result"]
    )
    .unwrap();

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record one push send outcome
pub fn record_push(outcome: &str) {
    PUSH_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record an invalid token removal
pub fn record_token_pruned() {
    TOKENS_PRUNED_TOTAL.inc();
}

/// Record an inbox write
pub fn record_inbox_write() {
    INBOX_WRITES_TOTAL.inc();
}

/// Record a per-user dispatch
pub fn record_dispatch(notification_type: &str, delivered: bool) {
    let result = if delivered { "delivered" } else { "inbox_only" };
    DISPATCHES_TOTAL
        .with_label_values(&[notification_type, result])
        .inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_push_and_prune() {
        record_push("delivered");
        record_push("invalid_token");
        record_token_pruned();
        let metrics = render_metrics();
        assert!(metrics.contains("push_attempts_total"));
        assert!(metrics.contains("push_tokens_pruned_total"));
    }

    #[test]
    fn test_record_dispatch_and_inbox() {
        record_dispatch("general", false);
        record_inbox_write();
        let metrics = render_metrics();
        assert!(metrics.contains("dispatches_total"));
        assert!(metrics.contains("inbox_writes_total"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("stale_token_cleanup", "success", 0.2);
        let metrics = render_metrics();
        assert!(metrics.contains("background_jobs_total"));
        assert!(metrics.contains("background_job_duration_seconds"));
    }
}
