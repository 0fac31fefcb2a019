//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_TOTAL, MESSAGES_SENT_TOTAL, RECOVERY_DROPPED_TOTAL, RECOVERY_ENQUEUED_TOTAL,
    RECOVERY_REPLAYED_TOTAL, SEND_ERRORS_HANDLED_TOTAL, SEND_FAILURES_TOTAL, SEND_RETRIES_TOTAL,
    SEND_TIMEOUTS_TOTAL, USERS_CONNECTED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    /// Refresh the registry gauges after a membership change
    pub fn update_gauges(total_connections: usize, unique_users: usize) {
        CONNECTIONS_TOTAL.set(total_connections as i64);
        USERS_CONNECTED.set(unique_users as i64);
    }
}

/// Helper struct for recording delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record a message delivered to a single connection
    pub fn record_connection_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["connection"]).inc();
    }

    /// Record a fan-out to a user's connections
    pub fn record_user_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["user"]).inc();
    }

    /// Record a send resolved through a thread association
    pub fn record_thread_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["thread"]).inc();
    }

    /// Record an attempt that hit the per-attempt timeout
    pub fn record_timeout() {
        SEND_TIMEOUTS_TOTAL.inc();
    }

    /// Record failed attempts recovered by a later retry
    pub fn record_retries(count: u64) {
        SEND_RETRIES_TOTAL.inc_by(count);
    }

    /// Record a send abandoned after exhausting all attempts
    pub fn record_failure() {
        SEND_FAILURES_TOTAL.inc();
    }

    /// Record a transport error absorbed by the engine
    pub fn record_error_handled() {
        SEND_ERRORS_HANDLED_TOTAL.inc();
    }
}

/// Helper struct for recording recovery queue metrics
pub struct RecoveryMetrics;

impl RecoveryMetrics {
    pub fn record_enqueued() {
        RECOVERY_ENQUEUED_TOTAL.inc();
    }

    pub fn record_dropped() {
        RECOVERY_DROPPED_TOTAL.inc();
    }

    pub fn record_replayed(count: u64) {
        RECOVERY_REPLAYED_TOTAL.inc_by(count);
    }
}
