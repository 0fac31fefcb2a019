//! Supervision of named long-running background tasks.
//!
//! Each supervised task runs under its own name; starting a task under an
//! existing name cancels and replaces the prior one. A watcher task records
//! how the work ended (completed, panicked, cancelled), and tasks that run a
//! periodic loop can tick a [`TaskPulse`] so stalls are detectable. The
//! monitor must be fully stoppable: shutdown aborts every task and awaits
//! its termination.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::metrics::MONITORED_TASKS;

const STATE_RUNNING: u8 = 0;
const STATE_COMPLETED: u8 = 1;
const STATE_FAILED: u8 = 2;
const STATE_CANCELLED: u8 = 3;

fn state_name(state: u8) -> &'static str {
    match state {
        STATE_RUNNING => "running",
        STATE_COMPLETED => "completed",
        STATE_FAILED => "failed",
        _ => "cancelled",
    }
}

/// Heartbeat handle a periodic task ticks once per round.
#[derive(Clone)]
pub struct TaskPulse {
    epoch: tokio::time::Instant,
    last_beat_ms: Arc<AtomicI64>,
}

impl TaskPulse {
    fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
            last_beat_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn beat(&self) {
        self.last_beat_ms
            .store(self.epoch.elapsed().as_millis() as i64, Ordering::Relaxed);
    }

    fn age(&self) -> Duration {
        let last = self.last_beat_ms.load(Ordering::Relaxed);
        let now = self.epoch.elapsed().as_millis() as i64;
        Duration::from_millis(now.saturating_sub(last).max(0) as u64)
    }
}

struct MonitoredTask {
    /// Abort handle for the supervised work itself
    abort: tokio::task::AbortHandle,
    /// Watcher that records how the work ended
    watcher: JoinHandle<()>,
    state: Arc<AtomicU8>,
    started_at: DateTime<Utc>,
    pulse: Option<TaskPulse>,
    expected_interval: Option<Duration>,
}

/// Status of every supervised task.
#[derive(Debug, Clone, Serialize)]
pub struct BackgroundTaskStatus {
    pub monitoring_enabled: bool,
    pub total_tasks: usize,
    pub tasks: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskHealth {
    pub state: String,
    pub healthy: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_age_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallHealth {
    pub score: u8,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringHealth {
    pub monitoring_enabled: bool,
    pub task_health: HashMap<String, TaskHealth>,
    pub overall_health: OverallHealth,
    pub alerts: Vec<String>,
}

pub struct HealthMonitor {
    tasks: DashMap<String, MonitoredTask>,
    enabled: AtomicBool,
    /// Heartbeat is stale after missing this many expected intervals
    stale_factor: u32,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_stale_factor(2)
    }

    pub fn with_stale_factor(stale_factor: u32) -> Self {
        Self {
            tasks: DashMap::new(),
            enabled: AtomicBool::new(true),
            stale_factor: stale_factor.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable_background_monitoring(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        tracing::info!("Background monitoring enabled");
    }

    /// Launch a supervised task. A duplicate name cancels and replaces the
    /// prior task under that name.
    pub async fn start_monitored_background_task<F>(&self, name: &str, future: F) -> String
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_internal(name, None, None, future).await
    }

    /// Launch a supervised periodic task that reports liveness through a
    /// [`TaskPulse`]. Missing heartbeats surface as monitoring alerts.
    pub async fn spawn_with_heartbeat<F, Fut>(
        &self,
        name: &str,
        expected_interval: Duration,
        f: F,
    ) -> String
    where
        F: FnOnce(TaskPulse) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let pulse = TaskPulse::new();
        let future = f(pulse.clone());
        self.spawn_internal(name, Some(pulse), Some(expected_interval), future)
            .await
    }

    async fn spawn_internal<F>(
        &self,
        name: &str,
        pulse: Option<TaskPulse>,
        expected_interval: Option<Duration>,
        future: F,
    ) -> String
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_enabled() {
            tracing::warn!(task = %name, "Starting background task while monitoring is disabled");
        }

        // Replace-on-duplicate: the old task is fully stopped first.
        if let Some((_, old)) = self.tasks.remove(name) {
            tracing::info!(task = %name, "Replacing existing background task");
            Self::stop_task(old).await;
        }

        let state = Arc::new(AtomicU8::new(STATE_RUNNING));
        let inner = tokio::spawn(future);
        let abort = inner.abort_handle();

        let watcher_state = state.clone();
        let watcher_name = name.to_string();
        let watcher = tokio::spawn(async move {
            match inner.await {
                Ok(()) => {
                    watcher_state.store(STATE_COMPLETED, Ordering::Relaxed);
                    tracing::debug!(task = %watcher_name, "Background task completed");
                }
                Err(e) if e.is_cancelled() => {
                    watcher_state.store(STATE_CANCELLED, Ordering::Relaxed);
                }
                Err(e) => {
                    watcher_state.store(STATE_FAILED, Ordering::Relaxed);
                    tracing::error!(task = %watcher_name, error = %e, "Background task terminated unexpectedly");
                }
            }
        });

        let task = MonitoredTask {
            abort,
            watcher,
            state,
            started_at: Utc::now(),
            pulse,
            expected_interval,
        };

        self.tasks.insert(name.to_string(), task);
        MONITORED_TASKS.set(self.tasks.len() as i64);

        tracing::info!(task = %name, "Background task started");
        name.to_string()
    }

    /// Cancel a task and await its termination. Returns whether a task with
    /// that name existed.
    pub async fn stop_background_task(&self, name: &str) -> bool {
        let Some((_, task)) = self.tasks.remove(name) else {
            return false;
        };
        Self::stop_task(task).await;
        MONITORED_TASKS.set(self.tasks.len() as i64);
        tracing::info!(task = %name, "Background task stopped");
        true
    }

    async fn stop_task(task: MonitoredTask) {
        task.abort.abort();
        // The watcher observes the cancellation and then finishes itself.
        let _ = task.watcher.await;
    }

    pub fn get_background_task_status(&self) -> BackgroundTaskStatus {
        let tasks = self
            .tasks
            .iter()
            .map(|entry| {
                let state = entry.value().state.load(Ordering::Relaxed);
                (entry.key().clone(), state_name(state).to_string())
            })
            .collect();

        BackgroundTaskStatus {
            monitoring_enabled: self.is_enabled(),
            total_tasks: self.tasks.len(),
            tasks,
        }
    }

    /// Aggregate per-task liveness into a single score with alerts.
    pub fn get_monitoring_health_status(&self) -> MonitoringHealth {
        let mut task_health = HashMap::new();
        let mut alerts = Vec::new();
        let mut healthy_count = 0usize;

        for entry in self.tasks.iter() {
            let name = entry.key();
            let task = entry.value();
            let state = task.state.load(Ordering::Relaxed);

            let heartbeat_age = task.pulse.as_ref().map(|p| p.age());
            let stale = match (heartbeat_age, task.expected_interval) {
                (Some(age), Some(expected)) => age > expected * self.stale_factor,
                _ => false,
            };

            let mut healthy = true;
            if state == STATE_FAILED {
                healthy = false;
                alerts.push(format!("task '{}' terminated unexpectedly", name));
            } else if state == STATE_RUNNING && stale {
                healthy = false;
                let age = heartbeat_age.unwrap_or_default();
                alerts.push(format!(
                    "task '{}' missed its heartbeat (last beat {}ms ago)",
                    name,
                    age.as_millis()
                ));
            }

            if healthy {
                healthy_count += 1;
            }

            task_health.insert(
                name.clone(),
                TaskHealth {
                    state: state_name(state).to_string(),
                    healthy,
                    started_at: task.started_at,
                    heartbeat_age_ms: heartbeat_age.map(|d| d.as_millis() as u64),
                },
            );
        }

        let total = self.tasks.len();
        let score = if total == 0 {
            100
        } else {
            ((healthy_count * 100) / total) as u8
        };
        let status = if score >= 90 {
            "healthy"
        } else if score >= 50 {
            "degraded"
        } else {
            "unhealthy"
        };

        MonitoringHealth {
            monitoring_enabled: self.is_enabled(),
            task_health,
            overall_health: OverallHealth {
                score,
                status: status.to_string(),
            },
            alerts,
        }
    }

    /// Cancel and await every supervised task, then disable monitoring.
    pub async fn shutdown_background_monitoring(&self) {
        self.enabled.store(false, Ordering::Relaxed);

        let names: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, task)) = self.tasks.remove(&name) {
                Self::stop_task(task).await;
                tracing::debug!(task = %name, "Background task stopped during shutdown");
            }
        }

        MONITORED_TASKS.set(0);
        tracing::info!("Background monitoring shut down");
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
