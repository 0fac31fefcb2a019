use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::metrics::ConnectionMetrics;

use super::connection::Connection;
use super::locks::UserLocks;
use super::types::{ConnectionDiagnostics, RegistryStats, UserConnectionHealth};

/// Most users hold one or two simultaneous connections.
pub type ConnectionList = SmallVec<[Arc<Connection>; 2]>;

/// Process-wide map of live connections.
///
/// Two primary maps: connection id -> record, and user id -> set of
/// connection ids. The user index is derived state and is only ever mutated
/// under the owning user's lock, so the two stay consistent. Lookups across
/// different users never contend.
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Arc<Connection>>,
    user_index: DashMap<String, HashSet<Uuid>>,
    thread_index: DashMap<String, HashSet<Uuid>>,
    locks: Arc<UserLocks>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_locks(Arc::new(UserLocks::new()))
    }

    /// Share a lock table with other components (the recovery queue
    /// serializes against the same per-user locks).
    pub fn with_locks(locks: Arc<UserLocks>) -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            thread_index: DashMap::new(),
            locks,
        }
    }

    pub fn user_locks(&self) -> Arc<UserLocks> {
        self.locks.clone()
    }

    /// Register a connection under its user's lock.
    pub async fn add_connection(&self, conn: Arc<Connection>) {
        let lock = self.locks.for_user(&conn.user_id);
        let _guard = lock.lock().await;

        let conn_id = conn.id;
        self.connections.insert(conn_id, conn.clone());
        self.user_index
            .entry(conn.user_id.clone())
            .or_default()
            .insert(conn_id);

        if let Some(thread_id) = conn.thread_id().await {
            self.thread_index
                .entry(thread_id)
                .or_default()
                .insert(conn_id);
        }

        ConnectionMetrics::update_gauges(self.connections.len(), self.user_index.len());

        tracing::info!(
            connection_id = %conn_id,
            user_id = %conn.user_id,
            "Connection registered"
        );
    }

    /// Remove a connection from every index. Unknown ids are a no-op.
    pub async fn remove_connection(&self, connection_id: Uuid) {
        // Resolve the owner first so the removal runs under the right lock.
        let conn = match self.connections.get(&connection_id) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        let lock = self.locks.for_user(&conn.user_id);
        let _guard = lock.lock().await;

        if self.connections.remove(&connection_id).is_none() {
            // Lost the race with a concurrent removal.
            return;
        }

        if let Some(mut user_conns) = self.user_index.get_mut(&conn.user_id) {
            user_conns.remove(&connection_id);
            if user_conns.is_empty() {
                drop(user_conns);
                self.user_index.remove(&conn.user_id);
            }
        }

        if let Some(thread_id) = conn.thread_id().await {
            self.detach_from_thread(&thread_id, connection_id);
        }

        ConnectionMetrics::update_gauges(self.connections.len(), self.user_index.len());

        tracing::info!(
            connection_id = %connection_id,
            user_id = %conn.user_id,
            "Connection unregistered"
        );
    }

    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<Connection>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Connection ids currently registered for a user (possibly empty).
    pub fn get_user_connection_ids(&self, user_id: &str) -> HashSet<Uuid> {
        self.user_index
            .get(user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Resolved connection records for a user.
    pub fn get_user_connections(&self, user_id: &str) -> ConnectionList {
        self.user_index
            .get(user_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connections currently associated with a thread.
    pub fn get_thread_connections(&self, thread_id: &str) -> ConnectionList {
        self.thread_index
            .get(thread_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True iff at least one of the user's connections has an open transport.
    pub fn is_connection_active(&self, user_id: &str) -> bool {
        self.get_user_connections(user_id)
            .iter()
            .any(|conn| conn.is_active())
    }

    /// Re-associate a connection with a logical conversation thread.
    /// Returns false for unknown connections.
    pub async fn update_connection_thread(&self, connection_id: Uuid, thread_id: &str) -> bool {
        let conn = match self.connections.get(&connection_id) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };

        let lock = self.locks.for_user(&conn.user_id);
        let _guard = lock.lock().await;

        let previous = conn.set_thread_id(Some(thread_id.to_string())).await;
        if let Some(old_thread) = previous {
            if old_thread != thread_id {
                self.detach_from_thread(&old_thread, connection_id);
            }
        }

        self.thread_index
            .entry(thread_id.to_string())
            .or_default()
            .insert(connection_id);

        tracing::debug!(
            connection_id = %connection_id,
            thread_id = %thread_id,
            "Connection thread association updated"
        );

        true
    }

    /// Diagnostic snapshot of one user's connections. Read-only.
    pub async fn get_connection_health(&self, user_id: &str) -> UserConnectionHealth {
        let connections = self.get_user_connections(user_id);
        let mut diagnostics = Vec::with_capacity(connections.len());
        let mut active = 0;

        for conn in &connections {
            let open = conn.is_active();
            if open {
                active += 1;
            }
            diagnostics.push(ConnectionDiagnostics {
                connection_id: conn.id,
                thread_id: conn.thread_id().await,
                connected_at: conn.connected_at,
                message_count: conn.message_count(),
                is_healthy: conn.is_healthy(),
                transport_open: open,
            });
        }

        UserConnectionHealth {
            user_id: user_id.to_string(),
            total: connections.len(),
            active,
            connections: diagnostics,
        }
    }

    /// Block until the user has an active connection, polling at
    /// `check_interval`. Returns false once `timeout` elapses.
    pub async fn wait_for_connection(
        &self,
        user_id: &str,
        timeout: Duration,
        check_interval: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.is_connection_active(user_id) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            let remaining = deadline - tokio::time::Instant::now();
            tokio::time::sleep(check_interval.min(remaining)).await;
        }
    }

    /// Connections whose transport reports closed, for the stale sweep.
    pub fn find_closed_connections(&self) -> Vec<Uuid> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_active())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Every user id with at least one registered connection.
    pub fn connected_users(&self) -> Vec<String> {
        self.user_index.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.connections.len(),
            unique_users: self.user_index.len(),
            active_threads: self.thread_index.len(),
        }
    }

    fn detach_from_thread(&self, thread_id: &str, connection_id: Uuid) {
        if let Some(mut thread_conns) = self.thread_index.get_mut(thread_id) {
            thread_conns.remove(&connection_id);
            if thread_conns.is_empty() {
                drop(thread_conns);
                self.thread_index.remove(thread_id);
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
