//! Dashboard and explorer endpoints

use super::{failure, ApiResponse, ApiState, Owner};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// Summary of the caller's wallet
pub async fn get_dashboard(
    State(state): State<ApiState>,
    Owner(owner): Owner,
) -> impl IntoResponse {
    match state.app.ledger.reporting.dashboard(&owner).await {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::success(summary))),
        Err(e) => failure(&e),
    }
}

/// Totals over all active channels
pub async fn get_network(State(state): State<ApiState>) -> impl IntoResponse {
    match state.app.ledger.reporting.network().await {
        Ok(totals) => (StatusCode::OK, Json(ApiResponse::success(totals))),
        Err(e) => failure(&e),
    }
}
