//! HTTP API server for the relay
//!
//! Only the relay surface lives here: turn endpoints, the memory boundary,
//! and health probes. Account CRUD, thread listing, and authentication are
//! owned by the fronting web tier, which forwards the caller's identity in
//! the `x-user-id` header.

pub mod chat;
pub mod health;
pub mod memory;

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::ScratchCache;
use crate::db::{ConversationRepo, DbPool, MemoryRepo};
use crate::relay::Relay;
use crate::{Error, Result};

/// Identity header set by the fronting web tier
const USER_HEADER: &str = "x-user-id";

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub conversations: ConversationRepo,
    pub memory: MemoryRepo,
    pub scratch: ScratchCache,
    pub relay: Relay,
}

/// Error body returned by all endpoints
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error type: status plus a user-safe body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Resolve the calling user from request headers
///
/// # Errors
///
/// Returns 401 if the identity header is missing or empty
pub fn caller_id(headers: &HeaderMap) -> std::result::Result<String, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "missing user identity".to_string(),
                }),
            )
        })
}

/// Map a relay error to a response, leaking nothing to non-owners.
///
/// `AccessDenied` deliberately shares the not-found shape so thread
/// existence is never confirmed to a caller who does not own it.
#[must_use]
pub fn error_response(error: &Error) -> ApiError {
    match error {
        Error::AccessDenied | Error::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "thread not found".to_string(),
            }),
        ),
        Error::UpstreamUnavailable(detail) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: detail.clone(),
            }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "internal error".to_string(),
            }),
        ),
    }
}

/// Build the full API router
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = chat::router(Arc::clone(&state))
        .merge(memory::router(Arc::clone(&state)))
        .merge(health::router(state));

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the API until shutdown
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails
pub async fn serve(host: &str, port: u16, state: Arc<ApiState>) -> Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    tracing::info!(host, port, "relay API listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
