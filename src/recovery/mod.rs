//! Bounded per-user backlog of undelivered messages.
//!
//! When a send exhausts its attempts, or a user has no live connection at
//! all, the serialized message lands here and is replayed once the user
//! reconnects. Each user's queue is capped; the oldest entry is evicted to
//! make room. Enqueue and drain both serialize through the owning user's
//! lock, so a drain never interleaves with a concurrent enqueue for the
//! same user.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::metrics::RecoveryMetrics;
use crate::registry::UserLocks;

/// Hard cap on undelivered messages held per user.
pub const MAX_PENDING_PER_USER: usize = 50;

/// A message awaiting redelivery.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveredMessage {
    /// The serialized payload exactly as it would have gone on the wire
    pub message: Value,
    /// Why the original delivery did not happen
    pub failure_reason: String,
    /// When the message was parked
    pub enqueued_at: DateTime<Utc>,
}

/// Aggregate queue counts for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStats {
    pub total_pending: usize,
    pub users_with_pending: usize,
    pub max_queue_size: usize,
    pub capacity_per_user: usize,
}

pub struct RecoveryQueue {
    queues: DashMap<String, VecDeque<RecoveredMessage>>,
    locks: Arc<UserLocks>,
    max_per_user: usize,
}

impl RecoveryQueue {
    pub fn new(locks: Arc<UserLocks>) -> Self {
        Self::with_capacity(locks, MAX_PENDING_PER_USER)
    }

    pub fn with_capacity(locks: Arc<UserLocks>, max_per_user: usize) -> Self {
        Self {
            queues: DashMap::new(),
            locks,
            max_per_user,
        }
    }

    /// Park a message for a user, evicting the oldest entry when full.
    pub async fn enqueue(&self, user_id: &str, message: Value, reason: impl Into<String>) {
        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        let mut queue = self.queues.entry(user_id.to_string()).or_default();

        if queue.len() >= self.max_per_user {
            if let Some(dropped) = queue.pop_front() {
                RecoveryMetrics::record_dropped();
                tracing::debug!(
                    user_id = %user_id,
                    dropped_reason = %dropped.failure_reason,
                    queue_size = queue.len(),
                    "Dropped oldest message from full recovery queue"
                );
            }
        }

        queue.push_back(RecoveredMessage {
            message,
            failure_reason: reason.into(),
            enqueued_at: Utc::now(),
        });
        RecoveryMetrics::record_enqueued();

        tracing::debug!(
            user_id = %user_id,
            queue_size = queue.len(),
            "Message enqueued for recovery"
        );
    }

    /// Return and clear every pending message for a user, oldest first.
    pub async fn drain(&self, user_id: &str) -> Vec<RecoveredMessage> {
        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        let messages: Vec<RecoveredMessage> = match self.queues.remove(user_id) {
            Some((_, queue)) => queue.into(),
            None => return Vec::new(),
        };

        if !messages.is_empty() {
            tracing::info!(
                user_id = %user_id,
                message_count = messages.len(),
                "Drained recovery queue for user"
            );
        }

        messages
    }

    /// Pending count for one user.
    pub fn pending(&self, user_id: &str) -> usize {
        self.queues.get(user_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Users that currently have parked messages.
    pub fn users_with_pending(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> RecoveryStats {
        let mut total_pending = 0;
        let mut users_with_pending = 0;
        let mut max_queue_size = 0;

        for entry in self.queues.iter() {
            let size = entry.len();
            total_pending += size;
            users_with_pending += 1;
            max_queue_size = max_queue_size.max(size);
        }

        RecoveryStats {
            total_pending,
            users_with_pending,
            max_queue_size,
            capacity_per_user: self.max_per_user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> RecoveryQueue {
        RecoveryQueue::new(Arc::new(UserLocks::new()))
    }

    #[tokio::test]
    async fn test_enqueue_and_drain_preserves_order() {
        let queue = queue();

        for n in 0..5 {
            queue.enqueue("u1", json!({"n": n}), "send_timeout").await;
        }
        assert_eq!(queue.pending("u1"), 5);

        let drained = queue.drain("u1").await;
        assert_eq!(drained.len(), 5);
        for (n, entry) in drained.iter().enumerate() {
            assert_eq!(entry.message, json!({"n": n}));
            assert_eq!(entry.failure_reason, "send_timeout");
        }
        assert_eq!(queue.pending("u1"), 0);
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let queue = queue();
        assert!(queue.drain("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest_not_newest() {
        let queue = queue();

        for n in 0..(MAX_PENDING_PER_USER + 1) {
            queue.enqueue("u1", json!({"n": n}), "user_offline").await;
        }

        assert_eq!(queue.pending("u1"), MAX_PENDING_PER_USER);
        let drained = queue.drain("u1").await;
        // Entry #0 was evicted by the 51st enqueue
        assert_eq!(drained.first().unwrap().message, json!({"n": 1}));
        assert_eq!(
            drained.last().unwrap().message,
            json!({"n": MAX_PENDING_PER_USER})
        );
    }

    #[tokio::test]
    async fn test_queues_are_per_user() {
        let queue = queue();
        queue.enqueue("u1", json!(1), "user_offline").await;
        queue.enqueue("u2", json!(2), "user_offline").await;
        queue.enqueue("u2", json!(3), "user_offline").await;

        assert_eq!(queue.pending("u1"), 1);
        assert_eq!(queue.pending("u2"), 2);

        let stats = queue.stats();
        assert_eq!(stats.total_pending, 3);
        assert_eq!(stats.users_with_pending, 2);
        assert_eq!(stats.max_queue_size, 2);
        assert_eq!(stats.capacity_per_user, MAX_PENDING_PER_USER);
    }

    #[tokio::test]
    async fn test_concurrent_enqueues_all_land() {
        let queue = Arc::new(RecoveryQueue::new(Arc::new(UserLocks::new())));

        let handles: Vec<_> = (0..20)
            .map(|n| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue.enqueue("u1", json!({"n": n}), "user_offline").await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.pending("u1"), 20);
    }
}
