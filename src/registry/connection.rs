use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::transport::Transport;

/// One live transport session for a user.
///
/// The Connection owns the transport handle; the registry only holds
/// `Arc<Connection>` references. A connection belongs to exactly one user
/// for its whole lifetime; the thread association may change.
pub struct Connection {
    pub id: Uuid,
    pub user_id: String,
    thread_id: RwLock<Option<String>>,
    pub transport: Arc<dyn Transport>,
    pub connected_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    message_count: AtomicU64,
    is_healthy: AtomicBool,
}

impl Connection {
    pub fn new(user_id: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            thread_id: RwLock::new(None),
            transport,
            connected_at: Utc::now(),
            metadata: HashMap::new(),
            message_count: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    pub fn with_thread(
        user_id: String,
        thread_id: Option<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            thread_id: RwLock::new(thread_id),
            ..Self::new(user_id, transport)
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub async fn thread_id(&self) -> Option<String> {
        self.thread_id.read().await.clone()
    }

    pub async fn set_thread_id(&self, thread_id: Option<String>) -> Option<String> {
        let mut slot = self.thread_id.write().await;
        std::mem::replace(&mut *slot, thread_id)
    }

    pub fn record_message(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn mark_unhealthy(&self) {
        self.is_healthy.store(false, Ordering::Relaxed);
    }

    pub fn mark_healthy(&self) {
        self.is_healthy.store(true, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::Relaxed)
    }

    /// Open transport is what makes a connection deliverable.
    pub fn is_active(&self) -> bool {
        self.transport.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use tokio::sync::mpsc;

    fn channel_connection() -> (Connection, mpsc::Receiver<serde_json::Value>) {
        let (tx, rx) = mpsc::channel(4);
        let conn = Connection::new("u1".to_string(), Arc::new(ChannelTransport::new(tx)));
        (conn, rx)
    }

    #[tokio::test]
    async fn test_new_connection_defaults() {
        let (conn, _rx) = channel_connection();
        assert_eq!(conn.user_id, "u1");
        assert_eq!(conn.message_count(), 0);
        assert!(conn.is_healthy());
        assert!(conn.is_active());
        assert_eq!(conn.thread_id().await, None);
    }

    #[tokio::test]
    async fn test_thread_association_replaces_previous() {
        let (conn, _rx) = channel_connection();
        assert_eq!(conn.set_thread_id(Some("t1".into())).await, None);
        assert_eq!(conn.set_thread_id(Some("t2".into())).await, Some("t1".into()));
        assert_eq!(conn.thread_id().await, Some("t2".into()));
    }

    #[tokio::test]
    async fn test_closed_transport_makes_connection_inactive() {
        let (conn, rx) = channel_connection();
        drop(rx);
        assert!(!conn.is_active());
    }
}
