// Core delivery path
pub mod delivery;
pub mod payload;
pub mod recovery;
pub mod registry;
pub mod transport;

// Supervision
pub mod monitor;
pub mod tasks;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;

pub use delivery::DeliveryEngine;
pub use error::RelayError;
pub use events::LifecycleEvent;
pub use monitor::HealthMonitor;
pub use recovery::RecoveryQueue;
pub use registry::{Connection, ConnectionRegistry};
