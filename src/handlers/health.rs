use crate::{db, handlers::AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub database: ComponentStatus,
    pub latency_ms: u64,
}

/// Readiness: the service is up when its database answers a ping.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let database = match db::check_connection(&state.db).await {
        Ok(()) => ComponentStatus::Up,
        Err(e) => {
            warn!(error = %e, "health check: database unavailable");
            ComponentStatus::Down
        }
    };

    let (code, status) = match database {
        ComponentStatus::Up => (StatusCode::OK, ComponentStatus::Up),
        ComponentStatus::Down => (StatusCode::SERVICE_UNAVAILABLE, ComponentStatus::Down),
    };

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database,
        latency_ms: start.elapsed().as_millis() as u64,
    };

    (code, Json(body))
}
