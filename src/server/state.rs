use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::Settings;
use crate::delivery::DeliveryEngine;
use crate::monitor::HealthMonitor;
use crate::recovery::RecoveryQueue;
use crate::registry::{ConnectionRegistry, UserLocks};
use crate::tasks::{RecoveryFlushTask, StaleConnectionTask};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub recovery: Arc<RecoveryQueue>,
    pub engine: Arc<DeliveryEngine>,
    pub monitor: Arc<HealthMonitor>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        // Registry and recovery queue serialize through the same per-user locks
        let locks = Arc::new(UserLocks::new());
        let registry = Arc::new(ConnectionRegistry::with_locks(locks.clone()));
        let recovery = Arc::new(RecoveryQueue::with_capacity(
            locks,
            settings.recovery.max_pending_per_user,
        ));
        let engine = Arc::new(DeliveryEngine::with_config(
            registry.clone(),
            recovery.clone(),
            settings.delivery.clone(),
            settings.is_preproduction(),
        ));
        let monitor = Arc::new(HealthMonitor::with_stale_factor(
            settings.monitor.heartbeat_stale_factor,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            settings: Arc::new(settings),
            registry,
            recovery,
            engine,
            monitor,
            shutdown_tx,
        }
    }

    /// Start the built-in supervised tasks: recovery flush and stale sweep.
    pub async fn start_background_tasks(&self) {
        let flush_interval = Duration::from_secs(self.settings.recovery.flush_interval_seconds);
        let engine = self.engine.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.monitor
            .spawn_with_heartbeat("recovery_flush", flush_interval, move |pulse| {
                RecoveryFlushTask::new(engine, flush_interval, pulse, shutdown).run()
            })
            .await;

        let sweep_interval =
            Duration::from_secs(self.settings.monitor.stale_check_interval_seconds);
        let registry = self.registry.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.monitor
            .spawn_with_heartbeat("stale_sweep", sweep_interval, move |pulse| {
                StaleConnectionTask::new(registry, sweep_interval, pulse, shutdown).run()
            })
            .await;
    }
}
