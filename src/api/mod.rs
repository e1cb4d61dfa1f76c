//! HTTP API for the ledger
//!
//! This module provides a RESTful API for:
//! - Opening, listing and closing channels
//! - Issuing invoices, point-of-sale checkouts and tips
//! - Sending payments
//! - Webhook callbacks confirming incoming payments
//! - Dashboard and explorer reports
//!
//! Every route except `/health` and `/v1/network` acts for the owner named in
//! the `X-Owner-Id` header, which the upstream identity provider sets.

use crate::{LedgerApp, LedgerError};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tower_http::cors::CorsLayer;
use tracing::info;

mod channels;
mod health;
mod invoices;
mod payments;
mod reports;

pub use channels::*;
pub use health::*;
pub use invoices::*;
pub use payments::*;
pub use reports::*;

/// Header carrying the authenticated owner id
pub const OWNER_HEADER: &str = "x-owner-id";

/// Largest page a listing returns
const MAX_LIST_LIMIT: u32 = 500;

/// API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    /// The ledger application
    pub app: LedgerApp,
}

/// Build the API router
fn build_router(app: LedgerApp) -> Router {
    let state = ApiState { app };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Channel endpoints
        .route("/v1/channels", post(open_channel).get(list_channels))
        .route("/v1/channels/:channel_id", get(get_channel))
        .route("/v1/channels/:channel_id/close", post(close_channel))
        // Invoice endpoints
        .route("/v1/invoices", post(create_invoice).get(list_invoices))
        .route("/v1/invoices/:payment_hash", get(get_invoice))
        .route("/v1/invoices/:payment_hash/cancel", post(cancel_invoice))
        .route("/v1/checkout", post(create_checkout))
        .route("/v1/tips", post(create_tip))
        // Payment webhook
        .route("/v1/webhook/payment", post(handle_payment_webhook))
        // Outgoing payments
        .route("/v1/payments", post(send_payment).get(list_payments))
        .route("/v1/payments/:payment_id", get(get_payment))
        // Reports
        .route("/v1/dashboard", get(get_dashboard))
        .route("/v1/network", get(get_network))
        // Add state
        .with_state(state)
}

/// Start the HTTP API server
pub async fn serve(app: LedgerApp) -> anyhow::Result<()> {
    let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    serve_with_shutdown(app, shutdown_rx).await
}

/// Start the HTTP API server with graceful shutdown
pub async fn serve_with_shutdown(
    app: LedgerApp,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let config = app.config.clone();

    let router = build_router(app);

    let router = if config.api.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    let addr: std::net::SocketAddr = config
        .api
        .bind_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    info!("Starting HTTP API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
            info!("Received shutdown signal, stopping API server...");
        })
        .await?;

    info!("API server stopped gracefully");
    Ok(())
}

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (only present if success is true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (only present if success is false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Convert LedgerError to HTTP status code
pub fn error_to_status_code(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::InvalidTransition(_) => StatusCode::CONFLICT,
        LedgerError::Expired(_) => StatusCode::GONE,
        LedgerError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Generation(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LedgerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error reply for a failed ledger call
pub(crate) fn failure<T>(err: &LedgerError) -> (StatusCode, Json<ApiResponse<T>>) {
    (
        error_to_status_code(err),
        Json(ApiResponse::error(err.to_string())),
    )
}

/// Owner named by the `X-Owner-Id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiResponse<()>>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Owner(value.to_string()))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ApiResponse::error("Missing X-Owner-Id header")),
                )
            })
    }
}

/// Listing parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Only return records in this status
    #[serde(default)]
    pub status: Option<String>,
    /// Maximum number of records
    #[serde(default)]
    pub limit: Option<u32>,
}

impl ListParams {
    /// Parsed status filter
    pub fn status<T: FromStr>(&self) -> Result<Option<T>, LedgerError>
    where
        T::Err: std::fmt::Display,
    {
        self.status
            .as_deref()
            .map(|s| s.parse::<T>())
            .transpose()
            .map_err(|e| LedgerError::Validation(e.to_string()))
    }

    /// Page size, clamped to the server maximum
    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(crate::ledger::DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::Database, Config};
    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn router() -> Router {
        let db = Database::in_memory().await.unwrap();
        build_router(LedgerApp::with_database(Config::default(), db))
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        owner: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            request = request.header(OWNER_HEADER, owner);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let router = router().await;
        let (status, body) = call(&router, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "healthy");
        assert_eq!(body["data"]["database_connected"], true);
    }

    #[tokio::test]
    async fn test_missing_owner_is_unauthorized() {
        let router = router().await;
        let (status, body) = call(&router, Method::GET, "/v1/channels", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = call(&router, Method::GET, "/v1/dashboard", Some("  "), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_channel_open_close() {
        let router = router().await;
        let (status, body) = call(
            &router,
            Method::POST,
            "/v1/channels",
            Some("alice"),
            Some(json!({ "remote_pubkey": "03abc", "capacity_sats": 1_000_000 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["local_balance_sats"], 1_000_000);
        assert_eq!(body["data"]["is_public"], true);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(&router, Method::GET, "/v1/channels", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let uri = format!("/v1/channels/{}", id);
        let (status, _) = call(&router, Method::GET, &uri, Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/v1/channels/{}/close", id);
        let (status, body) = call(&router, Method::POST, &uri, Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "closed");

        let (status, _) = call(&router, Method::POST, &uri, Some("alice"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_invalid_amount_is_bad_request() {
        let router = router().await;
        let (status, body) = call(
            &router,
            Method::POST,
            "/v1/channels",
            Some("alice"),
            Some(json!({ "remote_pubkey": "03abc", "capacity_sats": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_invoice_paid_through_webhook() {
        let router = router().await;
        let (status, body) = call(
            &router,
            Method::POST,
            "/v1/invoices",
            Some("alice"),
            Some(json!({ "amount_msats": 10_000_000, "description": "Coffee" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "pending");
        let hash = body["data"]["payment_hash"].as_str().unwrap().to_string();

        // Underpayment does not settle the invoice
        let (status, _) = call(
            &router,
            Method::POST,
            "/v1/webhook/payment",
            Some("alice"),
            Some(json!({ "payment_hash": hash, "amount_msat": 1_000 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &router,
            Method::POST,
            "/v1/webhook/payment",
            Some("alice"),
            Some(json!({ "payment_hash": hash, "amount_msat": 10_000_000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["processed"], true);
        assert_eq!(body["data"]["invoice"]["status"], "paid");

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/v1/invoices/{}/cancel", hash),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &router,
            Method::GET,
            "/v1/invoices?status=paid",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_status_filter_is_bad_request() {
        let router = router().await;
        let (status, _) = call(
            &router,
            Method::GET,
            "/v1/invoices?status=settled",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_checkout_and_tip() {
        let router = router().await;
        let (status, body) = call(
            &router,
            Method::POST,
            "/v1/checkout",
            Some("shop"),
            Some(json!({ "items": [
                { "name": "Coffee", "price_sats": 5_000, "quantity": 2 },
                { "name": "Bagel", "price_sats": 3_500, "quantity": 1 }
            ] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["description"], "2x Coffee, 1x Bagel");
        assert_eq!(body["data"]["amount_msats"], 13_500_000u64);

        let (status, body) = call(
            &router,
            Method::POST,
            "/v1/tips",
            Some("bob"),
            Some(json!({ "amount_sats": 21_000, "recipient": "satoshi" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["description"], "Tip to satoshi");
    }

    #[tokio::test]
    async fn test_send_payment_and_dashboard() {
        let router = router().await;
        call(
            &router,
            Method::POST,
            "/v1/channels",
            Some("alice"),
            Some(json!({ "remote_pubkey": "03abc", "capacity_sats": 20_000 })),
        )
        .await;

        let (status, body) = call(
            &router,
            Method::POST,
            "/v1/payments",
            Some("alice"),
            Some(json!({ "amount_msats": 3_000_000, "destination": "03dest" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "succeeded");
        assert_eq!(body["data"]["fee_msats"], 3_000);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &router,
            Method::POST,
            "/v1/payments",
            Some("alice"),
            Some(json!({ "amount_msats": 90_000_000, "destination": "03dest" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "failed");
        assert_eq!(body["data"]["failure"], "insufficient_balance");

        let uri = format!("/v1/payments/{}", id);
        let (status, _) = call(&router, Method::GET, &uri, Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&router, Method::GET, "/v1/dashboard", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["spendable_sats"], 17_000);
        assert_eq!(body["data"]["total_sent_msats"], 3_000_000);
        assert_eq!(body["data"]["payments_by_status"]["failed"], 1);

        let (status, body) = call(&router, Method::GET, "/v1/network", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_channels"], 1);
        assert_eq!(body["data"]["total_capacity_sats"], 20_000);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_to_status_code(&LedgerError::Expired("x".into())),
            StatusCode::GONE
        );
        assert_eq!(
            error_to_status_code(&LedgerError::not_found("invoice", "x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_to_status_code(&LedgerError::Generation("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_list_params() {
        let params = ListParams {
            status: Some("paid".to_string()),
            limit: Some(10_000),
        };
        assert_eq!(params.limit(), MAX_LIST_LIMIT);
        assert_eq!(
            params.status::<crate::state::InvoiceStatus>().unwrap(),
            Some(crate::state::InvoiceStatus::Paid)
        );
        assert_eq!(ListParams::default().limit(), 50);
    }
}
