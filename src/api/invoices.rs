//! Invoice, checkout and tip endpoints, plus the payment webhook

use super::{failure, ApiResponse, ApiState, ListParams, Owner};
use crate::db::Invoice;
use crate::ledger::CheckoutItem;
use crate::state::InvoiceStatus;
use crate::LedgerError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Create an invoice
#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    /// Amount (millisatoshis)
    pub amount_msats: u64,
    /// Description shown to the payer
    #[serde(default)]
    pub description: String,
    /// Lifetime override (seconds)
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Point-of-sale checkout
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Cart contents
    pub items: Vec<CheckoutItem>,
}

/// Tip
#[derive(Debug, Deserialize)]
pub struct TipRequest {
    /// Tip amount (satoshis)
    pub amount_sats: u64,
    /// Who the tip is for
    pub recipient: String,
    /// Optional note; replaces the default description
    #[serde(default)]
    pub message: Option<String>,
}

/// Payment webhook payload
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    /// Payment hash of the settled invoice
    pub payment_hash: String,
    /// Amount received (millisatoshis), checked against the invoice if present
    #[serde(default)]
    pub amount_msat: Option<u64>,
}

/// Payment webhook response
#[derive(Debug, Serialize)]
pub struct PaymentWebhookResponse {
    /// Whether the webhook was processed successfully
    pub processed: bool,
    /// Invoice after settlement
    pub invoice: Invoice,
}

/// Issue an invoice
pub async fn create_invoice(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Json(req): Json<CreateInvoiceRequest>,
) -> impl IntoResponse {
    let ttl = req
        .ttl_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.app.config.ledger.invoice_ttl());

    info!(
        "API: Create invoice for owner={}: {} msat, ttl={:?}",
        owner, req.amount_msats, ttl
    );

    match state
        .app
        .ledger
        .invoices
        .create(&owner, req.amount_msats, &req.description, ttl)
        .await
    {
        Ok(invoice) => (StatusCode::CREATED, Json(ApiResponse::success(invoice))),
        Err(e) => failure(&e),
    }
}

/// List the caller's invoices
pub async fn list_invoices(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let status = match params.status::<InvoiceStatus>() {
        Ok(status) => status,
        Err(e) => return failure(&e),
    };

    match state
        .app
        .ledger
        .invoices
        .list(&owner, status, params.limit())
        .await
    {
        Ok(invoices) => (StatusCode::OK, Json(ApiResponse::success(invoices))),
        Err(e) => failure(&e),
    }
}

/// Get one of the caller's invoices
pub async fn get_invoice(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Path(payment_hash): Path<String>,
) -> impl IntoResponse {
    match state.app.ledger.invoices.get(&owner, &payment_hash).await {
        Ok(invoice) => (StatusCode::OK, Json(ApiResponse::success(invoice))),
        Err(e) => failure(&e),
    }
}

/// Withdraw a pending invoice
pub async fn cancel_invoice(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Path(payment_hash): Path<String>,
) -> impl IntoResponse {
    info!("API: Cancel invoice {} for owner={}", payment_hash, owner);

    match state.app.ledger.invoices.cancel(&owner, &payment_hash).await {
        Ok(invoice) => (StatusCode::OK, Json(ApiResponse::success(invoice))),
        Err(e) => failure(&e),
    }
}

/// Issue a checkout invoice for a point-of-sale cart
pub async fn create_checkout(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Json(req): Json<CheckoutRequest>,
) -> impl IntoResponse {
    info!(
        "API: Checkout for owner={} with {} item(s)",
        owner,
        req.items.len()
    );

    match state
        .app
        .ledger
        .invoices
        .create_checkout(&owner, &req.items)
        .await
    {
        Ok(invoice) => (StatusCode::CREATED, Json(ApiResponse::success(invoice))),
        Err(e) => failure(&e),
    }
}

/// Issue a tip invoice
pub async fn create_tip(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Json(req): Json<TipRequest>,
) -> impl IntoResponse {
    match state
        .app
        .ledger
        .invoices
        .create_tip(
            &owner,
            req.amount_sats,
            &req.recipient,
            req.message.as_deref(),
        )
        .await
    {
        Ok(invoice) => (StatusCode::CREATED, Json(ApiResponse::success(invoice))),
        Err(e) => failure(&e),
    }
}

/// Handle payment webhook
///
/// Called by the payment processor once an incoming payment settles. Marks
/// the matching invoice paid.
pub async fn handle_payment_webhook(
    State(state): State<ApiState>,
    Owner(owner): Owner,
    Json(req): Json<PaymentWebhookRequest>,
) -> impl IntoResponse {
    info!(
        "Received payment webhook: owner={}, hash={}, amount={:?} msat",
        owner, req.payment_hash, req.amount_msat
    );

    let invoices = &state.app.ledger.invoices;

    if let Some(received) = req.amount_msat {
        let invoice = match invoices.get(&owner, &req.payment_hash).await {
            Ok(invoice) => invoice,
            Err(e) => return failure(&e),
        };
        if received < invoice.amount_msats {
            warn!(
                "Underpaid invoice {}: received {} of {} msat",
                req.payment_hash, received, invoice.amount_msats
            );
            return failure(&LedgerError::Validation(format!(
                "received {} msat, invoice requires {}",
                received, invoice.amount_msats
            )));
        }
    }

    match invoices.mark_paid(&owner, &req.payment_hash).await {
        Ok(invoice) => (
            StatusCode::OK,
            Json(ApiResponse::success(PaymentWebhookResponse {
                processed: true,
                invoice,
            })),
        ),
        Err(e) => failure(&e),
    }
}
