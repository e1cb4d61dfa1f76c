//! Outgoing payment endpoints

use super::{failure, ApiResponse, ApiState, ListParams, Owner};
use crate::ledger::PaymentOrder;
use crate::state::PaymentStatus;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::info;

/// Send a payment
///
/// A payment the ledger refused (insufficient balance, fee or settlement
/// failure) is still recorded and returned; check its `status`.
pub async fn send_payment(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Json(order): Json<PaymentOrder>,
) -> impl IntoResponse {
    info!(
        "API: Send payment for owner={}: {} msat to {}",
        owner, order.amount_msats, order.destination
    );

    match state.app.ledger.payments.initiate(&owner, order).await {
        Ok(payment) => (StatusCode::CREATED, Json(ApiResponse::success(payment))),
        Err(e) => failure(&e),
    }
}

/// List the caller's payments
pub async fn list_payments(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let status = match params.status::<PaymentStatus>() {
        Ok(status) => status,
        Err(e) => return failure(&e),
    };

    match state
        .app
        .ledger
        .payments
        .list(&owner, status, params.limit())
        .await
    {
        Ok(payments) => (StatusCode::OK, Json(ApiResponse::success(payments))),
        Err(e) => failure(&e),
    }
}

/// Get one of the caller's payments
pub async fn get_payment(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Path(payment_id): Path<String>,
) -> impl IntoResponse {
    match state.app.ledger.payments.get(&owner, &payment_id).await {
        Ok(payment) => (StatusCode::OK, Json(ApiResponse::success(payment))),
        Err(e) => failure(&e),
    }
}
