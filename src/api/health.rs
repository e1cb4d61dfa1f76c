//! Health check endpoints

use super::{ApiResponse, ApiState};
use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use tracing::warn;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Ledger store answers queries
    pub database_connected: bool,
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<ApiState>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let database_connected = match state.app.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check: database unavailable: {}", e);
            false
        }
    };

    let (code, status) = if database_connected {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database_connected,
    };

    (code, Json(ApiResponse::success(response)))
}
