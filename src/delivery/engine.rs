use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::error::RelayError;
use crate::metrics::{DeliveryMetrics, RecoveryMetrics};
use crate::payload::{self, Payload, PayloadKey};
use crate::recovery::RecoveryQueue;
use crate::registry::{Connection, ConnectionRegistry};
use crate::transport::TransportError;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::stats::{DeliveryStats, DeliveryStatsSnapshot};

/// Outcome of one send attempt. Timeout and Transient move the attempt loop
/// into its retry state when attempts remain; Disconnected is terminal.
enum AttemptOutcome {
    Sent,
    Timeout,
    Disconnected,
    Transient,
}

/// Routes serialized events to live connections.
///
/// Every per-attempt transport error is absorbed here; callers only see a
/// boolean plus the statistics counters. A send that returns false has been
/// parked in the recovery queue for redelivery, not lost.
pub struct DeliveryEngine {
    registry: Arc<ConnectionRegistry>,
    recovery: Arc<RecoveryQueue>,
    config: DeliveryConfig,
    preproduction: bool,
    stats: DeliveryStats,
}

impl DeliveryEngine {
    pub fn new(registry: Arc<ConnectionRegistry>, recovery: Arc<RecoveryQueue>) -> Self {
        Self::with_config(registry, recovery, DeliveryConfig::default(), false)
    }

    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        recovery: Arc<RecoveryQueue>,
        config: DeliveryConfig,
        preproduction: bool,
    ) -> Self {
        Self {
            registry,
            recovery,
            config,
            preproduction,
            stats: DeliveryStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn recovery(&self) -> &Arc<RecoveryQueue> {
        &self.recovery
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Register a connection and immediately replay the user's backlog.
    pub async fn register_connection(&self, conn: Arc<Connection>) {
        self.registry.add_connection(conn.clone()).await;

        let replayed = self.deliver_backlog(&conn.user_id).await;
        if replayed > 0 {
            tracing::info!(
                connection_id = %conn.id,
                user_id = %conn.user_id,
                replayed = replayed,
                "Replayed recovery backlog on reconnect"
            );
        }
    }

    /// Send one message to one connection with the configured timeout.
    pub async fn send_to_connection(&self, connection_id: Uuid, message: &Payload) -> bool {
        self.send_to_connection_with_timeout(connection_id, message, self.config.send_timeout())
            .await
    }

    /// Send with an explicit per-attempt timeout.
    #[tracing::instrument(name = "delivery.send", skip(self, message), fields(connection_id = %connection_id))]
    pub async fn send_to_connection_with_timeout(
        &self,
        connection_id: Uuid,
        message: &Payload,
        timeout: Duration,
    ) -> bool {
        let conn = match self.registry.get_connection(connection_id) {
            Some(conn) => conn,
            None => {
                tracing::warn!(connection_id = %connection_id, "Send requested for unknown connection");
                return false;
            }
        };

        let frame = payload::serialize(message);
        self.deliver(&conn, frame, timeout).await
    }

    /// Fan a message out to every connection of a user.
    ///
    /// With zero connections the message goes straight to the recovery queue.
    /// Returns true iff at least one connection received it.
    #[tracing::instrument(name = "delivery.send_to_user", skip(self, message), fields(user_id = %user_id))]
    pub async fn send_to_user(&self, user_id: &str, message: &Payload) -> bool {
        let connections = self.registry.get_user_connections(user_id);
        let frame = payload::serialize(message);

        if connections.is_empty() {
            tracing::debug!(user_id = %user_id, "User offline, message parked for recovery");
            self.recovery.enqueue(user_id, frame, "user_offline").await;
            return false;
        }

        self.stats.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
        DeliveryMetrics::record_user_sent();

        let timeout = self.config.send_timeout();
        let mut sends = FuturesUnordered::new();
        for conn in &connections {
            sends.push(self.deliver(conn, frame.clone(), timeout));
        }

        let mut delivered = 0usize;
        let mut failed = 0usize;
        while let Some(ok) = sends.next().await {
            if ok {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        tracing::debug!(
            user_id = %user_id,
            delivered = delivered,
            failed = failed,
            "Fanned message out to user connections"
        );

        delivered > 0
    }

    /// Send to the connection(s) currently associated with a thread.
    ///
    /// A thread with no associated connections yields false without a
    /// recovery enqueue; there is no user to key the backlog on.
    #[tracing::instrument(name = "delivery.send_to_thread", skip(self, message), fields(thread_id = %thread_id))]
    pub async fn send_to_thread(&self, thread_id: &str, message: &Payload) -> bool {
        let connections = self.registry.get_thread_connections(thread_id);

        if connections.is_empty() {
            tracing::debug!(thread_id = %thread_id, "No connections associated with thread");
            return false;
        }

        DeliveryMetrics::record_thread_sent();

        let frame = payload::serialize(message);
        let timeout = self.config.send_timeout();
        let mut sends = FuturesUnordered::new();
        for conn in &connections {
            sends.push(self.deliver(conn, frame.clone(), timeout));
        }

        let mut delivered = 0usize;
        while let Some(ok) = sends.next().await {
            if ok {
                delivered += 1;
            }
        }

        delivered > 0
    }

    /// Emit a critical lifecycle event to a user.
    ///
    /// Validates inputs before any send. The outgoing message is stamped
    /// with the emission timestamp and a `critical` marker. In
    /// pre-production a failed send gets one extra whole-send retry.
    pub async fn emit_critical_event(
        &self,
        user_id: &str,
        event_type: &str,
        data: Payload,
    ) -> Result<bool, RelayError> {
        if user_id.trim().is_empty() {
            return Err(RelayError::Validation(
                "user_id must not be empty".to_string(),
            ));
        }
        if event_type.trim().is_empty() {
            return Err(RelayError::Validation(
                "event_type must not be empty".to_string(),
            ));
        }

        let message = Payload::Map(vec![
            (
                PayloadKey::Str("event".to_string()),
                Payload::Str(event_type.to_string()),
            ),
            (PayloadKey::Str("data".to_string()), data),
            (
                PayloadKey::Str("timestamp".to_string()),
                Payload::Timestamp(Utc::now()),
            ),
            (PayloadKey::Str("critical".to_string()), Payload::Bool(true)),
        ]);

        let mut delivered = self.send_to_user(user_id, &message).await;

        if !delivered && self.preproduction {
            tokio::time::sleep(self.config.critical_retry_delay()).await;
            tracing::info!(
                user_id = %user_id,
                event_type = %event_type,
                "Retrying failed critical event in pre-production"
            );
            delivered = self.send_to_user(user_id, &message).await;
        }

        Ok(delivered)
    }

    /// Drain the user's recovery backlog and replay it, oldest first.
    ///
    /// Returns the number of messages that reached a connection. Entries
    /// that fail again go back to the queue in their original order.
    pub async fn deliver_backlog(&self, user_id: &str) -> usize {
        let backlog = self.recovery.drain(user_id).await;
        if backlog.is_empty() {
            return 0;
        }

        let connections = self.registry.get_user_connections(user_id);
        let target = connections.iter().find(|c| c.is_active()).cloned();
        let target = match target {
            Some(conn) => conn,
            None => {
                // Reconnect raced a disconnect; park everything again.
                for entry in backlog {
                    self.recovery
                        .enqueue(user_id, entry.message, entry.failure_reason)
                        .await;
                }
                return 0;
            }
        };

        let timeout = self.config.send_timeout();
        let mut replayed = 0usize;
        let mut pending = backlog.into_iter();

        while let Some(entry) = pending.next() {
            if self.deliver(&target, entry.message, timeout).await {
                replayed += 1;
            } else {
                // The failed entry is already back in the queue; keep the
                // rest in order behind it.
                for rest in pending.by_ref() {
                    self.recovery
                        .enqueue(user_id, rest.message, rest.failure_reason)
                        .await;
                }
                break;
            }
        }

        if replayed > 0 {
            RecoveryMetrics::record_replayed(replayed as u64);
        }

        replayed
    }

    /// One message to one connection: timed attempts, backoff between them,
    /// recovery handoff when everything fails.
    async fn deliver(&self, conn: &Arc<Connection>, frame: Value, timeout: Duration) -> bool {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay_ms: self.config.backoff_initial_ms,
            max_delay_ms: self.config.backoff_max_ms,
            multiplier: 2.0,
            jitter_factor: 0.0,
        });

        let max_attempts = self.config.max_send_attempts.max(1);
        let mut failed_attempts: u64 = 0;
        let mut last_failure = "send_timeout";

        for attempt in 1..=max_attempts {
            let outcome =
                match tokio::time::timeout(timeout, conn.transport.send(frame.clone())).await {
                    Ok(Ok(())) => AttemptOutcome::Sent,
                    Ok(Err(TransportError::Disconnected)) => AttemptOutcome::Disconnected,
                    Ok(Err(TransportError::Transient(reason))) => {
                        tracing::warn!(
                            connection_id = %conn.id,
                            user_id = %conn.user_id,
                            attempt = attempt,
                            error = %reason,
                            "Transient send failure"
                        );
                        AttemptOutcome::Transient
                    }
                    Err(_) => AttemptOutcome::Timeout,
                };

            match outcome {
                AttemptOutcome::Sent => {
                    conn.record_message();
                    conn.mark_healthy();
                    self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                    DeliveryMetrics::record_connection_sent();

                    if failed_attempts > 0 {
                        self.stats
                            .timeout_retries
                            .fetch_add(failed_attempts, Ordering::Relaxed);
                        DeliveryMetrics::record_retries(failed_attempts);
                        tracing::debug!(
                            connection_id = %conn.id,
                            attempt = attempt,
                            recovered_after = failed_attempts,
                            "Send succeeded after retry"
                        );
                    }
                    return true;
                }
                AttemptOutcome::Disconnected => {
                    // Dead peer: tear the connection down now and park the
                    // message for redelivery after reconnect.
                    self.stats.errors_handled.fetch_add(1, Ordering::Relaxed);
                    DeliveryMetrics::record_error_handled();
                    tracing::info!(
                        connection_id = %conn.id,
                        user_id = %conn.user_id,
                        "Transport disconnected during send, removing connection"
                    );
                    self.registry.remove_connection(conn.id).await;
                    self.recovery
                        .enqueue(&conn.user_id, frame, "transport_disconnected")
                        .await;
                    return false;
                }
                AttemptOutcome::Transient => {
                    failed_attempts += 1;
                    last_failure = "transient_send_error";
                    self.stats.errors_handled.fetch_add(1, Ordering::Relaxed);
                    DeliveryMetrics::record_error_handled();
                }
                AttemptOutcome::Timeout => {
                    failed_attempts += 1;
                    last_failure = "send_timeout";
                    conn.mark_unhealthy();
                    self.stats.send_timeouts.fetch_add(1, Ordering::Relaxed);
                    DeliveryMetrics::record_timeout();
                    tracing::warn!(
                        connection_id = %conn.id,
                        user_id = %conn.user_id,
                        attempt = attempt,
                        timeout_ms = timeout.as_millis() as u64,
                        "Send attempt timed out"
                    );
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }

        self.stats.timeout_failures.fetch_add(1, Ordering::Relaxed);
        DeliveryMetrics::record_failure();
        self.recovery
            .enqueue(&conn.user_id, frame, last_failure)
            .await;

        tracing::warn!(
            connection_id = %conn.id,
            user_id = %conn.user_id,
            attempts = max_attempts,
            "Delivery failed after all attempts, message parked for recovery"
        );

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::UserLocks;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Mutex;

    #[derive(Clone, Copy)]
    enum SendOutcome {
        Deliver,
        Timeout,
        Disconnect,
        Transient,
    }

    /// Transport that plays back a script of outcomes, then delivers.
    struct ScriptedTransport {
        script: Mutex<VecDeque<SendOutcome>>,
        sent: Mutex<Vec<Value>>,
        open: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(script: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
            })
        }

        fn always_ok() -> Arc<Self> {
            Self::new(Vec::new())
        }

        async fn sent_frames(&self) -> Vec<Value> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, frame: Value) -> Result<(), TransportError> {
            let outcome = self
                .script
                .lock()
                .await
                .pop_front()
                .unwrap_or(SendOutcome::Deliver);
            match outcome {
                SendOutcome::Deliver => {
                    self.sent.lock().await.push(frame);
                    Ok(())
                }
                SendOutcome::Timeout => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
                SendOutcome::Disconnect => {
                    self.open.store(false, Ordering::Relaxed);
                    Err(TransportError::Disconnected)
                }
                SendOutcome::Transient => {
                    Err(TransportError::Transient("write buffer full".to_string()))
                }
            }
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::Relaxed)
        }
    }

    fn test_config() -> DeliveryConfig {
        DeliveryConfig {
            send_timeout_seconds: 1,
            max_send_attempts: 3,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30_000,
            critical_retry_delay_ms: 500,
        }
    }

    fn engine_with(preproduction: bool) -> DeliveryEngine {
        let locks = Arc::new(UserLocks::new());
        let registry = Arc::new(ConnectionRegistry::with_locks(locks.clone()));
        let recovery = Arc::new(RecoveryQueue::new(locks));
        DeliveryEngine::with_config(registry, recovery, test_config(), preproduction)
    }

    async fn connect(engine: &DeliveryEngine, user_id: &str, transport: Arc<ScriptedTransport>) -> Uuid {
        let conn = Arc::new(Connection::new(user_id.to_string(), transport));
        let id = conn.id;
        engine.register_connection(conn).await;
        id
    }

    #[tokio::test]
    async fn test_send_success_first_attempt() {
        let engine = engine_with(false);
        let transport = ScriptedTransport::always_ok();
        let conn_id = connect(&engine, "u1", transport.clone()).await;

        let ok = engine.send_to_connection(conn_id, &Payload::from("hello")).await;

        assert!(ok);
        assert_eq!(transport.sent_frames().await, vec![json!("hello")]);
        let stats = engine.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.timeout_retries, 0);
        assert_eq!(stats.send_timeouts, 0);
    }

    #[tokio::test]
    async fn test_send_unknown_connection() {
        let engine = engine_with(false);
        assert!(!engine.send_to_connection(Uuid::new_v4(), &Payload::Null).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_once_then_success() {
        let engine = engine_with(false);
        let transport = ScriptedTransport::new(vec![SendOutcome::Timeout]);
        let conn_id = connect(&engine, "u1", transport.clone()).await;

        let ok = engine.send_to_connection(conn_id, &Payload::Int(7)).await;

        assert!(ok);
        // Exactly two attempts: the timed-out one and the retry
        assert_eq!(transport.sent_frames().await.len(), 1);
        let stats = engine.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.timeout_retries, 1);
        assert_eq!(stats.send_timeouts, 1);
        assert_eq!(stats.timeout_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_all_attempts_parks_message() {
        let engine = engine_with(false);
        let transport = ScriptedTransport::new(vec![
            SendOutcome::Timeout,
            SendOutcome::Timeout,
            SendOutcome::Timeout,
        ]);
        let conn_id = connect(&engine, "u1", transport).await;

        let start = tokio::time::Instant::now();
        let ok = engine.send_to_connection(conn_id, &Payload::Int(9)).await;
        let elapsed = start.elapsed();

        assert!(!ok);
        // 3 one-second attempts plus 1s + 2s of backoff
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_secs(7));

        let stats = engine.stats();
        assert_eq!(stats.timeout_failures, 1);
        assert_eq!(stats.send_timeouts, 3);
        assert_eq!(stats.messages_sent, 0);

        assert_eq!(engine.recovery().pending("u1"), 1);
        let parked = engine.recovery().drain("u1").await;
        assert_eq!(parked[0].failure_reason, "send_timeout");
        assert_eq!(parked[0].message, json!(9));
    }

    #[tokio::test]
    async fn test_disconnect_is_not_retried() {
        let engine = engine_with(false);
        let transport = ScriptedTransport::new(vec![SendOutcome::Disconnect]);
        let conn_id = connect(&engine, "u1", transport).await;

        let ok = engine.send_to_connection(conn_id, &Payload::from("bye")).await;

        assert!(!ok);
        // Connection torn down immediately, message parked for reconnect
        assert!(engine.registry().get_connection(conn_id).is_none());
        let stats = engine.stats();
        assert_eq!(stats.errors_handled, 1);
        assert_eq!(stats.timeout_failures, 0);

        let parked = engine.recovery().drain("u1").await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].failure_reason, "transport_disconnected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_like_timeout() {
        let engine = engine_with(false);
        let transport = ScriptedTransport::new(vec![SendOutcome::Transient]);
        let conn_id = connect(&engine, "u1", transport.clone()).await;

        let ok = engine.send_to_connection(conn_id, &Payload::Int(1)).await;

        assert!(ok);
        let stats = engine.stats();
        assert_eq!(stats.errors_handled, 1);
        assert_eq!(stats.timeout_retries, 1);
        assert_eq!(stats.send_timeouts, 0);
    }

    #[tokio::test]
    async fn test_send_to_user_offline_parks_directly() {
        let engine = engine_with(false);

        let ok = engine.send_to_user("ghost", &Payload::from("late")).await;

        assert!(!ok);
        assert_eq!(engine.recovery().pending("ghost"), 1);
        let parked = engine.recovery().drain("ghost").await;
        assert_eq!(parked[0].failure_reason, "user_offline");
        // No fan-out happened
        assert_eq!(engine.stats().broadcasts_sent, 0);
    }

    #[tokio::test]
    async fn test_send_to_user_fans_out_to_all_connections() {
        let engine = engine_with(false);
        let first = ScriptedTransport::always_ok();
        let second = ScriptedTransport::always_ok();
        connect(&engine, "u1", first.clone()).await;
        connect(&engine, "u1", second.clone()).await;

        let ok = engine.send_to_user("u1", &Payload::from("fan")).await;

        assert!(ok);
        assert_eq!(first.sent_frames().await.len(), 1);
        assert_eq!(second.sent_frames().await.len(), 1);
        let stats = engine.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.broadcasts_sent, 1);
    }

    #[tokio::test]
    async fn test_send_to_thread_resolves_association() {
        let engine = engine_with(false);
        let transport = ScriptedTransport::always_ok();
        let conn_id = connect(&engine, "u1", transport.clone()).await;
        assert!(engine.registry().update_connection_thread(conn_id, "t1").await);

        assert!(engine.send_to_thread("t1", &Payload::from("threaded")).await);
        assert_eq!(transport.sent_frames().await.len(), 1);

        // Unassociated thread: nothing to send to
        assert!(!engine.send_to_thread("t2", &Payload::Null).await);
    }

    #[tokio::test]
    async fn test_emit_critical_event_validation() {
        let engine = engine_with(false);

        let err = engine
            .emit_critical_event("", "agent_started", Payload::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        let err = engine
            .emit_critical_event("u1", "", Payload::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        // Nothing was attempted or parked
        assert_eq!(engine.recovery().pending("u1"), 0);
    }

    #[tokio::test]
    async fn test_emit_critical_event_stamps_message() {
        let engine = engine_with(false);
        let transport = ScriptedTransport::always_ok();
        connect(&engine, "u1", transport.clone()).await;

        let delivered = engine
            .emit_critical_event("u1", "tool_completed", Payload::map([("tool", Payload::from("search"))]))
            .await
            .unwrap();

        assert!(delivered);
        let frames = transport.sent_frames().await;
        let frame = frames[0].as_object().unwrap();
        assert_eq!(frame["event"], json!("tool_completed"));
        assert_eq!(frame["critical"], json!(true));
        assert_eq!(frame["data"], json!({"tool": "search"}));
        assert!(frame["timestamp"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_critical_event_preproduction_retry() {
        let engine = engine_with(true);

        let delivered = engine
            .emit_critical_event("u1", "agent_started", Payload::Null)
            .await
            .unwrap();

        assert!(!delivered);
        // Both the original attempt and the pre-production retry parked
        assert_eq!(engine.recovery().pending("u1"), 2);
    }

    #[tokio::test]
    async fn test_backlog_replayed_in_order_on_reconnect() {
        let engine = engine_with(false);

        for n in 0..3 {
            engine.send_to_user("u1", &Payload::Int(n)).await;
        }
        assert_eq!(engine.recovery().pending("u1"), 3);

        let transport = ScriptedTransport::always_ok();
        connect(&engine, "u1", transport.clone()).await;

        let frames = transport.sent_frames().await;
        assert_eq!(frames, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(engine.recovery().pending("u1"), 0);
    }
}
