use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::handlers::{
    emit_event, health, monitoring_health, monitoring_tasks, prometheus_metrics, stats,
    user_connections,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Event emission for backend workers
                .route("/events", post(emit_event))
                // Diagnostics
                .route("/users/{user_id}/connections", get(user_connections))
                .route("/monitoring/tasks", get(monitoring_tasks))
                .route("/monitoring/health", get(monitoring_health)),
        )
}
