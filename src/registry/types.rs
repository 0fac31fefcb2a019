//! Registry snapshot structures for the diagnostic surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Process-wide registry counts.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub active_threads: usize,
}

/// Read-only view of one connection, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionDiagnostics {
    pub connection_id: Uuid,
    pub thread_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub message_count: u64,
    pub is_healthy: bool,
    pub transport_open: bool,
}

/// Per-user connection health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct UserConnectionHealth {
    pub user_id: String,
    pub total: usize,
    pub active: usize,
    pub connections: Vec<ConnectionDiagnostics>,
}
