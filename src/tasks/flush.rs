use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::delivery::DeliveryEngine;
use crate::monitor::TaskPulse;

/// Background task that redelivers parked messages as users reconnect.
///
/// The engine already replays a user's backlog at registration time; this
/// loop covers messages parked after that point (mid-session send failures)
/// and any replay that itself failed.
pub struct RecoveryFlushTask {
    engine: Arc<DeliveryEngine>,
    interval: Duration,
    pulse: TaskPulse,
    shutdown: broadcast::Receiver<()>,
}

impl RecoveryFlushTask {
    pub fn new(
        engine: Arc<DeliveryEngine>,
        interval: Duration,
        pulse: TaskPulse,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            engine,
            interval,
            pulse,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Recovery flush task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Recovery flush task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.flush_round().await;
                    self.pulse.beat();
                }
            }
        }

        tracing::info!("Recovery flush task stopped");
    }

    async fn flush_round(&self) {
        let users = self.engine.recovery().users_with_pending();
        if users.is_empty() {
            return;
        }

        let mut flushed_users = 0usize;
        let mut replayed = 0usize;

        for user_id in users {
            if !self.engine.registry().is_connection_active(&user_id) {
                continue;
            }

            let count = self.engine.deliver_backlog(&user_id).await;
            if count > 0 {
                flushed_users += 1;
                replayed += count;
            }
        }

        if replayed > 0 {
            tracing::info!(
                users = flushed_users,
                replayed = replayed,
                "Flushed recovery backlogs to reconnected users"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use crate::payload::Payload;
    use crate::recovery::RecoveryQueue;
    use crate::registry::{Connection, ConnectionRegistry, UserLocks};
    use crate::transport::ChannelTransport;
    use tokio::sync::mpsc;

    fn test_engine() -> Arc<DeliveryEngine> {
        let locks = Arc::new(UserLocks::new());
        let registry = Arc::new(ConnectionRegistry::with_locks(locks.clone()));
        let recovery = Arc::new(RecoveryQueue::new(locks));
        Arc::new(DeliveryEngine::with_config(
            registry,
            recovery,
            DeliveryConfig {
                send_timeout_seconds: 1,
                ..DeliveryConfig::default()
            },
            false,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_delivers_once_user_reconnects() {
        let engine = test_engine();

        // Park a message while the user is offline
        engine.send_to_user("u1", &Payload::from("later")).await;
        assert_eq!(engine.recovery().pending("u1"), 1);

        // User reconnects through the registry directly (no replay)
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(
            "u1".to_string(),
            Arc::new(ChannelTransport::new(tx)),
        ));
        engine.registry().add_connection(conn).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let monitor = crate::monitor::HealthMonitor::new();
        let task_engine = engine.clone();
        monitor
            .spawn_with_heartbeat("recovery_flush", Duration::from_secs(1), move |pulse| {
                RecoveryFlushTask::new(task_engine, Duration::from_secs(1), pulse, shutdown_rx)
                    .run()
            })
            .await;

        // The first interval tick flushes the backlog
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("flush should deliver within a few intervals")
            .expect("channel should stay open");
        assert_eq!(frame, serde_json::json!("later"));
        assert_eq!(engine.recovery().pending("u1"), 0);

        let _ = shutdown_tx.send(());
        monitor.shutdown_background_monitoring().await;
    }
}
