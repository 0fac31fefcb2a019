use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryStatsSnapshot;
use crate::error::RelayError;
use crate::metrics::encode_metrics;
use crate::monitor::{BackgroundTaskStatus, MonitoringHealth};
use crate::payload::Payload;
use crate::recovery::RecoveryStats;
use crate::registry::{RegistryStats, UserConnectionHealth};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: RegistryStats,
    pub delivery: DeliveryStatsSnapshot,
    pub recovery: RecoveryStats,
}

#[derive(Debug, Deserialize)]
pub struct EmitEventRequest {
    pub user_id: String,
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct EmitEventResponse {
    /// False means the event is parked in the recovery queue, not lost
    pub delivered: bool,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.registry.stats(),
        delivery: state.engine.stats(),
        recovery: state.recovery.stats(),
    })
}

pub async fn user_connections(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<UserConnectionHealth> {
    Json(state.registry.get_connection_health(&user_id).await)
}

pub async fn emit_event(
    State(state): State<AppState>,
    Json(request): Json<EmitEventRequest>,
) -> Result<Json<EmitEventResponse>, RelayError> {
    let delivered = state
        .engine
        .emit_critical_event(
            &request.user_id,
            &request.event_type,
            Payload::from(request.data),
        )
        .await?;

    Ok(Json(EmitEventResponse { delivered }))
}

pub async fn monitoring_tasks(State(state): State<AppState>) -> Json<BackgroundTaskStatus> {
    Json(state.monitor.get_background_task_status())
}

pub async fn monitoring_health(State(state): State<AppState>) -> Json<MonitoringHealth> {
    Json(state.monitor.get_monitoring_health_status())
}

pub async fn prometheus_metrics() -> Response {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}
