use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Lazily created per-user mutexes.
///
/// The table guarantees identity stability: every lookup of the same user
/// yields the same `Arc<Mutex>` instance, and no instance is ever shared
/// between two users. Creation goes through the map's atomic entry API, so
/// no outer lock guards the table itself.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Get or create the lock for a user.
    pub fn for_user(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Number of users that have ever acquired a lock.
    pub fn tracked_users(&self) -> usize {
        self.locks.len()
    }
}
