//! Memory boundary endpoints
//!
//! The compute service (and any other collaborator) records and retrieves
//! durable memory here, and parks checkpoint-style scratch state in the
//! TTL cache between calls within a turn. Scratch reads never fail: a
//! miss returns a null value, not an error.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{caller_id, error_response, ApiError, ApiState};
use crate::db::{MemoryKind, MemoryRecord};
use crate::Error;

/// Request body for recording a memory
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    pub content: String,
    pub kind: MemoryKind,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A memory record as serialized for callers
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecordDto {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub kind: MemoryKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

impl From<MemoryRecord> for MemoryRecordDto {
    fn from(record: MemoryRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            thread_id: record.thread_id,
            kind: record.kind,
            content: record.content,
            metadata: record.metadata,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

/// Query parameters for memory search
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

const fn default_search_limit() -> usize {
    10
}

/// Memory list response
#[derive(Debug, Serialize)]
pub struct MemoryListResponse {
    pub records: Vec<MemoryRecordDto>,
}

/// Request body for a scratch write
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchPutRequest {
    pub value: serde_json::Value,
    pub ttl_secs: u64,
}

/// Scratch read response; a miss is a null value, never an error
#[derive(Debug, Serialize)]
pub struct ScratchGetResponse {
    pub value: Option<serde_json::Value>,
}

/// Build the memory router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/memory", post(record))
        .route("/memory/search", get(search))
        .route("/threads/{thread_id}/memory", get(conversation_memory))
        .route("/scratch/{key}", get(scratch_get).put(scratch_put))
        .with_state(state)
}

/// Append a durable memory record for the caller
async fn record(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<RecordRequest>,
) -> Result<(StatusCode, Json<MemoryRecordDto>), ApiError> {
    let user_id = caller_id(&headers)?;

    let record = state
        .memory
        .record(
            &user_id,
            &request.content,
            request.kind,
            request.thread_id.as_deref(),
            request.metadata.as_ref(),
        )
        .map_err(|e| error_response(&e))?;

    Ok((StatusCode::CREATED, Json(record.into())))
}

/// Substring search over the caller's memory, newest first
async fn search(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<MemoryListResponse>, ApiError> {
    let user_id = caller_id(&headers)?;

    let records = state
        .memory
        .search(&user_id, &query.q, query.limit)
        .map_err(|e| error_response(&e))?;

    Ok(Json(MemoryListResponse {
        records: records.into_iter().map(Into::into).collect(),
    }))
}

/// Conversation-kind memory for an owned thread, oldest first
async fn conversation_memory(
    State(state): State<Arc<ApiState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MemoryListResponse>, ApiError> {
    let user_id = caller_id(&headers)?;

    let owned = state
        .conversations
        .is_owned_by(&thread_id, &user_id)
        .map_err(|e| error_response(&e))?;
    if !owned {
        return Err(error_response(&Error::AccessDenied));
    }

    let records = state
        .memory
        .conversation_memory(&thread_id)
        .map_err(|e| error_response(&e))?;

    Ok(Json(MemoryListResponse {
        records: records.into_iter().map(Into::into).collect(),
    }))
}

/// Park scratch state under a caller-scoped key
async fn scratch_put(
    State(state): State<Arc<ApiState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ScratchPutRequest>,
) -> Result<StatusCode, ApiError> {
    let user_id = caller_id(&headers)?;

    state
        .scratch
        .put(&scoped_key(&user_id, &key), request.value, request.ttl_secs);

    Ok(StatusCode::NO_CONTENT)
}

/// Read scratch state; absent or expired entries yield a null value
async fn scratch_get(
    State(state): State<Arc<ApiState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ScratchGetResponse>, ApiError> {
    let user_id = caller_id(&headers)?;

    Ok(Json(ScratchGetResponse {
        value: state.scratch.get(&scoped_key(&user_id, &key)),
    }))
}

/// Scratch keys are namespaced per caller
fn scoped_key(user_id: &str, key: &str) -> String {
    format!("{user_id}:{key}")
}
