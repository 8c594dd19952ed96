//! Shared test utilities

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use quill_relay::api::ApiState;
use quill_relay::context::{ContextBuilder, ContextConfig};
use quill_relay::db::{self, ConversationRepo, MemoryRepo, Thread};
use quill_relay::{DbPool, HttpComputeService, Relay, ScratchCache};

/// Scripted behavior for the mock compute service
#[derive(Clone)]
pub enum UpstreamScript {
    /// Blocking endpoint returns this JSON body
    Blocking(serde_json::Value),
    /// Streaming endpoint writes these transport chunks and closes
    Stream(Vec<Vec<u8>>),
    /// Both endpoints answer with this status
    Fail(StatusCode),
}

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Create a thread owned by `user_id`
pub fn create_test_thread(db: &DbPool, user_id: &str, title: &str) -> Thread {
    ConversationRepo::new(db.clone())
        .create_thread(user_id, title)
        .expect("failed to create test thread")
}

/// Spin up a scripted compute service on a local listener, returning its
/// base URL
pub async fn spawn_upstream(script: UpstreamScript) -> String {
    let app = Router::new()
        .route("/api/chat/process", post(process))
        .route("/api/chat/stream", post(stream))
        .with_state(Arc::new(script));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock upstream");
    let addr = listener.local_addr().expect("mock upstream has no addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{addr}")
}

async fn process(State(script): State<Arc<UpstreamScript>>) -> Response {
    match script.as_ref() {
        UpstreamScript::Blocking(body) => Json(body.clone()).into_response(),
        UpstreamScript::Fail(status) => (*status).into_response(),
        UpstreamScript::Stream(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stream(State(script): State<Arc<UpstreamScript>>) -> Response {
    match script.as_ref() {
        UpstreamScript::Stream(chunks) => {
            let chunks = chunks.clone();
            let body = Body::from_stream(futures::stream::iter(
                chunks.into_iter().map(Ok::<_, std::io::Error>),
            ));
            ([("content-type", "text/event-stream")], body).into_response()
        }
        UpstreamScript::Fail(status) => (*status).into_response(),
        UpstreamScript::Blocking(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Build a relay wired to a scripted compute service over real HTTP
pub async fn build_relay(db: &DbPool, script: UpstreamScript) -> Relay {
    let base_url = spawn_upstream(script).await;
    let compute = HttpComputeService::new(&base_url, Duration::from_secs(10))
        .expect("failed to build compute client");

    Relay::new(
        ConversationRepo::new(db.clone()),
        ContextBuilder::new(ContextConfig::default()),
        Arc::new(compute),
    )
}

/// Build full API state around a scripted compute service
pub async fn build_test_state(db: DbPool, script: UpstreamScript) -> Arc<ApiState> {
    let relay = build_relay(&db, script).await;

    Arc::new(ApiState {
        conversations: ConversationRepo::new(db.clone()),
        memory: MemoryRepo::new(db.clone()),
        scratch: ScratchCache::default(),
        relay,
        db,
    })
}
