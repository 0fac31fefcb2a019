use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::monitor::TaskPulse;
use crate::registry::ConnectionRegistry;

/// Background task that sweeps out connections whose transport has closed
/// without a clean disconnect (browser killed, network drop).
pub struct StaleConnectionTask {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    pulse: TaskPulse,
    shutdown: broadcast::Receiver<()>,
}

impl StaleConnectionTask {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        pulse: TaskPulse,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
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
            "Stale connection task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Stale connection task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep().await;
                    self.pulse.beat();
                }
            }
        }

        tracing::info!("Stale connection task stopped");
    }

    async fn sweep(&self) {
        let stale = self.registry.find_closed_connections();
        if stale.is_empty() {
            return;
        }

        let count = stale.len();
        for conn_id in stale {
            tracing::info!(connection_id = %conn_id, "Removing connection with closed transport");
            self.registry.remove_connection(conn_id).await;
        }

        tracing::info!(removed = count, "Swept stale connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::HealthMonitor;
    use crate::registry::Connection;
    use crate::transport::ChannelTransport;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_closed_connections() {
        let registry = Arc::new(ConnectionRegistry::new());

        let (tx_open, _rx_open) = mpsc::channel(4);
        let open = Arc::new(Connection::new(
            "u1".to_string(),
            Arc::new(ChannelTransport::new(tx_open)),
        ));
        registry.add_connection(open.clone()).await;

        let (tx_closed, rx_closed) = mpsc::channel(4);
        let closed = Arc::new(Connection::new(
            "u2".to_string(),
            Arc::new(ChannelTransport::new(tx_closed)),
        ));
        let closed_id = closed.id;
        registry.add_connection(closed).await;
        drop(rx_closed);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let monitor = HealthMonitor::new();
        let task_registry = registry.clone();
        monitor
            .spawn_with_heartbeat("stale_sweep", Duration::from_secs(1), move |pulse| {
                StaleConnectionTask::new(task_registry, Duration::from_secs(1), pulse, shutdown_rx)
                    .run()
            })
            .await;

        // Wait for at least one sweep round
        for _ in 0..50 {
            if registry.get_connection(closed_id).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert!(registry.get_connection(closed_id).is_none());
        assert!(registry.get_connection(open.id).is_some());
        assert_eq!(registry.stats().total_connections, 1);

        let _ = shutdown_tx.send(());
        monitor.shutdown_background_monitoring().await;
    }
}
