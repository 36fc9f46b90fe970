//! REST API for the Bridge
//!
//! Endpoints:
//! - POST /api/v1/deposit-address - Issue a deposit address
//! - GET /api/v1/deposits/:deposit_address - Deposit and payout status
//! - GET /api/v1/verify - Verify a deposit address against the xpub
//! - GET /api/v1/xpub - Extended public key for client-side verification
//! - GET /api/v1/stats - Deposit counts
//! - POST /api/v1/admin/deposits/:id/retry-payout - Re-queue a failed payout
//! - GET /health - Health check

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::service::{DepositService, ServiceError};
use crate::types::{CreateDepositRequest, DepositStatusResponse, VerifyQuery};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

// =============================================================================
// Application State
// =============================================================================

pub type AppState = Arc<DepositService>;

fn status_for(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::Duplicate(_) => StatusCode::CONFLICT,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: ServiceError) -> Response {
    let status = status_for(&error);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(target: "hdbridge::api", code = error.error_code(), "{}", error);
    }

    let body = ErrorResponse {
        error: error.to_string(),
        code: error.error_code(),
    };
    (status, Json(body)).into_response()
}

// =============================================================================
// API Handlers
// =============================================================================

/// POST /api/v1/deposit-address
///
/// Derive and register the deposit address for `{destinationAddress, nonce?}`.
async fn handle_create_deposit(
    State(service): State<AppState>,
    Json(req): Json<CreateDepositRequest>,
) -> Response {
    match service.create_deposit(&req).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/deposits/:deposit_address
async fn handle_get_deposit(
    State(service): State<AppState>,
    Path(deposit_address): Path<String>,
) -> Response {
    match service.get_deposit_status(&deposit_address).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/verify?depositAddress=&destinationAddress=&nonce=
async fn handle_verify(
    State(service): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    match service.verify_deposit_address(&query) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/xpub
async fn handle_xpub(State(service): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "xpub": service.xpub() }))
}

/// GET /api/v1/stats
async fn handle_stats(State(service): State<AppState>) -> Response {
    match service.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/admin/deposits/:id/retry-payout
///
/// Re-queue a failed payout that never broadcast a transaction.
async fn handle_retry_payout(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match service.retry_payout(&id).await {
        Ok(deposit) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "id": deposit.id,
                "status": DepositStatusResponse::from(&deposit)
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "hdbridge-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// =============================================================================
// Router Setup
// =============================================================================

/// Create the API router with all endpoints
pub fn create_router(service: Arc<DepositService>) -> Router {
    // CORS configuration - browser clients call the API directly
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/deposit-address", post(handle_create_deposit))
        .route("/api/v1/deposits/:deposit_address", get(handle_get_deposit))
        .route("/api/v1/verify", get(handle_verify))
        .route("/api/v1/xpub", get(handle_xpub))
        .route("/api/v1/stats", get(handle_stats))
        .route(
            "/api/v1/admin/deposits/:id/retry-payout",
            post(handle_retry_payout),
        )
        .layer(cors)
        .with_state(service)
}

/// Start the API server; returns once `shutdown` resolves
pub async fn start_server<F>(
    service: Arc<DepositService>,
    port: u16,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(service);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    println!("=== HD Bridge API ===");
    println!("Listening on http://{}", addr);
    println!();
    println!("Endpoints:");
    println!("  POST /api/v1/deposit-address                  - Issue deposit address");
    println!("  GET  /api/v1/deposits/:deposit_address        - Deposit status");
    println!("  GET  /api/v1/verify                           - Verify deposit address");
    println!("  GET  /api/v1/xpub                             - Extended public key");
    println!("  GET  /api/v1/stats                            - Statistics");
    println!("  POST /api/v1/admin/deposits/:id/retry-payout  - Retry failed payout");
    println!("  GET  /health                                  - Health check");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

// =============================================================================
// Tests
// =============================================================================
