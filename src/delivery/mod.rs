//! Delivery engine: timed sends, bounded retry with exponential backoff,
//! fan-out to a user's connections, and recovery-queue handoff on failure.

mod backoff;
mod engine;
mod stats;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use engine::DeliveryEngine;
pub use stats::{DeliveryStats, DeliveryStatsSnapshot};
