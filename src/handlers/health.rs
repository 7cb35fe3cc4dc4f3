use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;

use crate::AppState;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: &'static str,
    pub timestamp: String,
    pub database: ComponentHealth,
}

/// Readiness probe backed by a database ping
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let (status, code) = if db_result.is_ok() {
        (ComponentStatus::Up, StatusCode::OK)
    } else {
        (ComponentStatus::Down, StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().to_rfc3339(),
            database: ComponentHealth {
                status,
                latency_ms,
                error: db_result.err().map(|e| e.to_string()),
            },
        }),
    )
}
