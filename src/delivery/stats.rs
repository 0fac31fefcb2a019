//! Process-wide delivery counters.
//!
//! Relaxed atomics throughout: the counters feed diagnostics, not control
//! flow, so approximate counts under contention are acceptable.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct DeliveryStats {
    /// Messages successfully written to a transport
    pub messages_sent: AtomicU64,
    /// Transport errors absorbed by the engine
    pub errors_handled: AtomicU64,
    /// Failed attempts later recovered by a retry
    pub timeout_retries: AtomicU64,
    /// Sends abandoned after exhausting every attempt
    pub timeout_failures: AtomicU64,
    /// Attempts that exceeded the per-attempt timeout
    pub send_timeouts: AtomicU64,
    /// Fan-outs to all of a user's connections
    pub broadcasts_sent: AtomicU64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            errors_handled: self.errors_handled.load(Ordering::Relaxed),
            timeout_retries: self.timeout_retries.load(Ordering::Relaxed),
            timeout_failures: self.timeout_failures.load(Ordering::Relaxed),
            send_timeouts: self.send_timeouts.load(Ordering::Relaxed),
            broadcasts_sent: self.broadcasts_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of delivery statistics
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub messages_sent: u64,
    pub errors_handled: u64,
    pub timeout_retries: u64,
    pub timeout_failures: u64,
    pub send_timeouts: u64,
    pub broadcasts_sent: u64,
}
