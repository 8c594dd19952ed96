//! API endpoint integration tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use quill_relay::api;

mod common;
use common::{build_test_state, create_test_thread, setup_test_db, UpstreamScript};

fn json_request(method: &str, uri: &str, user: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = build_test_state(
        setup_test_db(),
        UpstreamScript::Blocking(serde_json::json!({"content": "x"})),
    )
    .await;
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let state = build_test_state(
        setup_test_db(),
        UpstreamScript::Blocking(serde_json::json!({"content": "x"})),
    )
    .await;
    let app = api::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["database"]["status"], "ok");
}

#[tokio::test]
async fn test_send_message_requires_identity() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "t");
    let state = build_test_state(db, UpstreamScript::Blocking(serde_json::json!({"content": "x"}))).await;
    let app = api::router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/api/threads/{}/messages", thread.id),
            None,
            &serde_json::json!({"content": "hello"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_blocking_turn_roundtrip() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "earnings");
    let state = build_test_state(
        db,
        UpstreamScript::Blocking(serde_json::json!({
            "content": "Apple reported...",
            "sources": [{"url": "https://example.com"}]
        })),
    )
    .await;
    let app = api::router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/api/threads/{}/messages", thread.id),
            Some("u1"),
            &serde_json::json!({"content": "Analyze Apple's Q3 earnings"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["userMessage"]["role"], "user");
    assert_eq!(json["assistantMessage"]["content"], "Apple reported...");
    assert_eq!(
        json["assistantMessage"]["sources"][0]["url"],
        "https://example.com"
    );
}

#[tokio::test]
async fn test_non_owner_gets_not_found_shape() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "owner", "t");
    let state = build_test_state(db, UpstreamScript::Blocking(serde_json::json!({"content": "x"}))).await;
    let app = api::router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/api/threads/{}/messages", thread.id),
            Some("intruder"),
            &serde_json::json!({"content": "hello"}),
        ))
        .await
        .unwrap();

    // Existence is not confirmed to non-owners
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"], "thread not found");
}

#[tokio::test]
async fn test_upstream_failure_maps_to_bad_gateway() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "t");
    let state =
        build_test_state(db, UpstreamScript::Fail(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let app = api::router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/api/threads/{}/messages", thread.id),
            Some("u1"),
            &serde_json::json!({"content": "query"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = json_body(response).await;
    let error = json["error"].as_str().unwrap();
    assert!(error.contains("reference"), "error carries a reference id: {error}");
}

#[tokio::test]
async fn test_create_thread_and_history() {
    let state = build_test_state(
        setup_test_db(),
        UpstreamScript::Blocking(serde_json::json!({"content": "answer"})),
    )
    .await;

    let created = api::router(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/threads",
            Some("u1"),
            &serde_json::json!({"title": "My research"}),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let thread = json_body(created).await;
    let thread_id = thread["id"].as_str().unwrap().to_string();

    // One turn, then read it back
    let sent = api::router(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/api/threads/{thread_id}/messages"),
            Some("u1"),
            &serde_json::json!({"content": "question"}),
        ))
        .await
        .unwrap();
    assert_eq!(sent.status(), StatusCode::OK);

    let history = api::router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/threads/{thread_id}/messages?limit=10"))
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(history.status(), StatusCode::OK);
    let json = json_body(history).await;
    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn test_streaming_endpoint_emits_sse() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "t");
    let chunks = vec![
        b"data: {\"type\": \"token\", \"content\": \"hi\"}\n".to_vec(),
        b"data: {\"type\": \"complete\", \"data\": {}}\n".to_vec(),
    ];
    let state = build_test_state(db, UpstreamScript::Stream(chunks)).await;
    let app = api::router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/api/threads/{}/messages/stream", thread.id),
            Some("u1"),
            &serde_json::json!({"content": "question"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8_lossy(&bytes);

    // User complete, one token, terminal complete
    assert!(body.contains("\"type\":\"token\""));
    assert_eq!(body.matches("\"type\":\"complete\"").count(), 2);
    assert!(body.contains("\"messageId\""));
}

#[tokio::test]
async fn test_memory_record_and_search() {
    let state = build_test_state(
        setup_test_db(),
        UpstreamScript::Blocking(serde_json::json!({"content": "x"})),
    )
    .await;

    let created = api::router(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/memory",
            Some("u1"),
            &serde_json::json!({"content": "Apple Q3 revenue grew 8%", "kind": "insight"}),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let found = api::router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/memory/search?q=apple&limit=5")
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(found.status(), StatusCode::OK);
    let json = json_body(found).await;
    assert_eq!(json["records"].as_array().unwrap().len(), 1);

    // Another user sees nothing
    let other = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/api/memory/search?q=apple&limit=5")
                .header("x-user-id", "u2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = json_body(other).await;
    assert!(json["records"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_scratch_roundtrip_and_miss() {
    let state = build_test_state(
        setup_test_db(),
        UpstreamScript::Blocking(serde_json::json!({"content": "x"})),
    )
    .await;

    let put = api::router(state.clone())
        .oneshot(json_request(
            "PUT",
            "/api/scratch/checkpoint-1",
            Some("u1"),
            &serde_json::json!({"value": {"node": "synthesize"}, "ttlSecs": 60}),
        ))
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::NO_CONTENT);

    let hit = api::router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/scratch/checkpoint-1")
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = json_body(hit).await;
    assert_eq!(json["value"]["node"], "synthesize");

    // A miss (other user's namespace) is a null value, not an error
    let miss = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/api/scratch/checkpoint-1")
                .header("x-user-id", "u2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(miss.status(), StatusCode::OK);
    let json = json_body(miss).await;
    assert!(json["value"].is_null());
}
