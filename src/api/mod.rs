//! API layer - HTTP endpoint handlers for diagnostics and event emission.

mod handlers;
mod routes;

pub use handlers::{
    emit_event, health, monitoring_health, monitoring_tasks, prometheus_metrics, stats,
    user_connections,
};
pub use routes::api_routes;
