//! Channel management API endpoints

use super::{failure, ApiResponse, ApiState, Owner};
use crate::state::ChannelStatus;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::info;

/// Open a channel
#[derive(Debug, Deserialize)]
pub struct OpenChannelRequest {
    /// Counterparty node public key
    pub remote_pubkey: String,
    /// Channel capacity (satoshis)
    pub capacity_sats: u64,
    /// Announce the channel to the network
    #[serde(default = "default_public")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

/// Channel listing filter
#[derive(Debug, Deserialize)]
pub struct ChannelListParams {
    /// Only return channels in this status
    #[serde(default)]
    pub status: Option<String>,
}

/// Open a channel funded from the local side
pub async fn open_channel(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Json(req): Json<OpenChannelRequest>,
) -> impl IntoResponse {
    info!(
        "API: Open channel request from owner={}: remote={}, capacity={} sats, public={}",
        owner, req.remote_pubkey, req.capacity_sats, req.is_public
    );

    match state
        .app
        .ledger
        .channels
        .open(&owner, &req.remote_pubkey, req.capacity_sats, req.is_public)
        .await
    {
        Ok(channel) => (StatusCode::CREATED, Json(ApiResponse::success(channel))),
        Err(e) => failure(&e),
    }
}

/// List the caller's channels
pub async fn list_channels(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Query(params): Query<ChannelListParams>,
) -> impl IntoResponse {
    let status = match params.status.as_deref().map(str::parse::<ChannelStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    };

    match state.app.ledger.channels.list(&owner, status).await {
        Ok(channels) => (StatusCode::OK, Json(ApiResponse::success(channels))),
        Err(e) => failure(&e),
    }
}

/// Get one of the caller's channels
pub async fn get_channel(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Path(channel_id): Path<String>,
) -> impl IntoResponse {
    match state.app.ledger.channels.get(&owner, &channel_id).await {
        Ok(channel) => (StatusCode::OK, Json(ApiResponse::success(channel))),
        Err(e) => failure(&e),
    }
}

/// Close one of the caller's channels
pub async fn close_channel(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Path(channel_id): Path<String>,
) -> impl IntoResponse {
    info!("API: Close channel {} for owner={}", channel_id, owner);

    match state.app.ledger.channels.close(&owner, &channel_id).await {
        Ok(channel) => (StatusCode::OK, Json(ApiResponse::success(channel))),
        Err(e) => failure(&e),
    }
}
