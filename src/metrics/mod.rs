//! Prometheus metrics for the event relay.
//!
//! - Connection metrics (active connections, connected users)
//! - Delivery metrics (sent, retries, timeouts, failures)
//! - Recovery queue metrics (enqueued, dropped, replayed)
//! - Monitor metrics (supervised task count)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, DeliveryMetrics, RecoveryMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of registered connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of registered connections"
    ).unwrap();

    /// Number of unique connected users
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique connected users"
    ).unwrap();

    /// WebSocket sessions opened
    pub static ref WS_SESSIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_sessions_opened_total", METRIC_PREFIX),
        "Total WebSocket sessions opened"
    ).unwrap();

    /// WebSocket sessions closed
    pub static ref WS_SESSIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_sessions_closed_total", METRIC_PREFIX),
        "Total WebSocket sessions closed"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Messages delivered, by target kind
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total messages delivered to a connection",
        &["target"]
    ).unwrap();

    /// Send attempts that hit the per-attempt timeout
    pub static ref SEND_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_send_timeouts_total", METRIC_PREFIX),
        "Send attempts that exceeded the per-attempt timeout"
    ).unwrap();

    /// Failed attempts that were later retried successfully
    pub static ref SEND_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_send_retries_total", METRIC_PREFIX),
        "Failed send attempts recovered by a retry"
    ).unwrap();

    /// Sends abandoned after exhausting every attempt
    pub static ref SEND_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_send_failures_total", METRIC_PREFIX),
        "Sends abandoned after exhausting all attempts"
    ).unwrap();

    /// Transport errors absorbed by the engine
    pub static ref SEND_ERRORS_HANDLED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_send_errors_handled_total", METRIC_PREFIX),
        "Transport errors absorbed during delivery"
    ).unwrap();

    // ============================================================================
    // Recovery Queue Metrics
    // ============================================================================

    /// Messages parked for offline delivery
    pub static ref RECOVERY_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_recovery_enqueued_total", METRIC_PREFIX),
        "Messages enqueued for later delivery"
    ).unwrap();

    /// Messages evicted from full per-user queues
    pub static ref RECOVERY_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_recovery_dropped_total", METRIC_PREFIX),
        "Oldest messages evicted from full recovery queues"
    ).unwrap();

    /// Messages replayed after reconnect
    pub static ref RECOVERY_REPLAYED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_recovery_replayed_total", METRIC_PREFIX),
        "Recovered messages replayed to a live connection"
    ).unwrap();

    // ============================================================================
    // Monitor Metrics
    // ============================================================================

    /// Supervised background tasks currently registered
    pub static ref MONITORED_TASKS: IntGauge = register_int_gauge!(
        format!("{}_monitored_tasks", METRIC_PREFIX),
        "Supervised background tasks currently registered"
    ).unwrap();
}
