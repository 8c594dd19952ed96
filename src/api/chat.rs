//! Turn endpoints: blocking send, streaming send, history

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::{caller_id, error_response, ApiError, ApiState};
use crate::relay::MessageDto;
use crate::Error;

/// Request body for creating a thread
#[derive(Debug, Deserialize)]
pub struct CreateThreadRequest {
    pub title: String,
}

/// Thread response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResponse {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for sending a message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Response body for a completed blocking turn
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub user_message: MessageDto,
    pub assistant_message: MessageDto,
}

/// Query parameters for history reads
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

const fn default_history_limit() -> usize {
    50
}

/// History response body
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageDto>,
}

/// Build the chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/threads", post(create_thread))
        .route("/threads/{thread_id}/messages", get(history).post(send_message))
        .route("/threads/{thread_id}/messages/stream", post(stream_message))
        .with_state(state)
}

/// Create a thread owned by the caller
async fn create_thread(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<CreateThreadRequest>,
) -> Result<(StatusCode, Json<ThreadResponse>), ApiError> {
    let user_id = caller_id(&headers)?;

    let thread = state
        .conversations
        .create_thread(&user_id, &request.title)
        .map_err(|e| error_response(&e))?;

    Ok((
        StatusCode::CREATED,
        Json(ThreadResponse {
            id: thread.id,
            user_id: thread.user_id,
            title: thread.title,
            created_at: thread.created_at.to_rfc3339(),
            updated_at: thread.updated_at.to_rfc3339(),
        }),
    ))
}

/// Blocking turn: returns both persisted messages once the compute
/// service finishes
async fn send_message(
    State(state): State<Arc<ApiState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    let user_id = caller_id(&headers)?;

    let turn = state
        .relay
        .send_message(&user_id, &thread_id, &request.content, request.metadata)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(TurnResponse {
        user_message: MessageDto::from(&turn.user_message),
        assistant_message: MessageDto::from(&turn.assistant_message),
    }))
}

/// Streaming turn: re-emits relay events as server-sent events
async fn stream_message(
    State(state): State<Arc<ApiState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let user_id = caller_id(&headers)?;

    let rx = state
        .relay
        .stream_message(&user_id, &thread_id, &request.content, request.metadata)
        .await
        .map_err(|e| error_response(&e))?;

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Recent history for a thread, oldest first
async fn history(
    State(state): State<Arc<ApiState>>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user_id = caller_id(&headers)?;

    let owned = state
        .conversations
        .is_owned_by(&thread_id, &user_id)
        .map_err(|e| error_response(&e))?;
    if !owned {
        return Err(error_response(&Error::AccessDenied));
    }

    let messages = state
        .conversations
        .list_recent_messages(&thread_id, query.limit)
        .map_err(|e| error_response(&e))?;

    Ok(Json(HistoryResponse {
        messages: messages.iter().map(MessageDto::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_tolerates_missing_metadata() {
        let request: SendMessageRequest =
            serde_json::from_str(r#"{"content": "hi"}"#).unwrap();
        assert_eq!(request.content, "hi");
        assert!(request.metadata.is_none());
    }

    #[test]
    fn history_query_default_limit() {
        let query: HistoryQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, 50);
    }
}
