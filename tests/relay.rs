//! Relay integration tests against a scripted compute service over real HTTP

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::sync::mpsc;

use quill_relay::context::{ContextBuilder, ContextConfig};
use quill_relay::db::{ConversationRepo, MessageRole};
use quill_relay::{HttpComputeService, Relay, RelayEvent};

mod common;
use common::{build_relay, create_test_thread, setup_test_db, UpstreamScript};

async fn drain(mut rx: mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn blocking_turn_end_to_end() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "earnings");

    let relay = build_relay(
        &db,
        UpstreamScript::Blocking(serde_json::json!({
            "content": "Apple reported record revenue.",
            "thinking_trace": {"nodes_executed": ["researcher", "synthesizer"]},
            "sources": [{"url": "https://example.com/q3", "title": "Q3 filing"}],
            "metadata": {"processing_time": 4.2}
        })),
    )
    .await;

    let turn = relay
        .send_message("u1", &thread.id, "Analyze Apple's Q3 earnings", None)
        .await
        .expect("turn should succeed");

    assert_eq!(turn.user_message.content, "Analyze Apple's Q3 earnings");
    assert_eq!(turn.assistant_message.content, "Apple reported record revenue.");
    assert_eq!(turn.assistant_message.sources.len(), 1);
    assert_eq!(turn.assistant_message.sources[0].url, "https://example.com/q3");
    assert_eq!(
        turn.assistant_message.sources[0].domain.as_deref(),
        Some("example.com")
    );

    let repo = ConversationRepo::new(db);
    let messages = repo.list_recent_messages(&thread.id, 10).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
}

#[tokio::test]
async fn blocking_turn_records_upstream_failure() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "t");

    let relay = build_relay(&db, UpstreamScript::Fail(StatusCode::INTERNAL_SERVER_ERROR)).await;

    let result = relay.send_message("u1", &thread.id, "query", None).await;
    assert!(result.is_err(), "upstream failure must surface as an error");

    // The turn is still fully on record: user message plus an assistant
    // message marking the failure
    let repo = ConversationRepo::new(db);
    let messages = repo.list_recent_messages(&thread.id, 10).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].metadata.as_ref().unwrap()["error"], true);
    assert!(
        !messages[1].content.contains("500"),
        "persisted text must not leak upstream detail: {}",
        messages[1].content
    );
}

#[tokio::test]
async fn streaming_turn_end_to_end() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "earnings");

    // The reference scenario, with transport chunks split mid-record
    let scenario: &[u8] = b"data: {\"type\": \"token\", \"content\": \"Apple\"}\n\
data: {\"type\": \"token\", \"content\": \" reported...\"}\n\
data: {\"type\": \"source\", \"data\": {\"url\": \"https://example.com\"}}\n\
data: {\"type\": \"complete\", \"data\": {}}\n";
    let chunks = vec![
        scenario[..23].to_vec(),
        scenario[23..61].to_vec(),
        scenario[61..130].to_vec(),
        scenario[130..].to_vec(),
    ];

    let relay = build_relay(&db, UpstreamScript::Stream(chunks)).await;

    let rx = relay
        .stream_message("u1", &thread.id, "Analyze Apple's Q3 earnings", None)
        .await
        .expect("stream should open");
    let events = drain(rx).await;

    // Immediate user complete, two tokens, one source, one terminal complete
    let tokens: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            RelayEvent::Token { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, vec!["Apple", " reported..."]);

    let source_count = events
        .iter()
        .filter(|e| matches!(e, RelayEvent::Source { .. }))
        .count();
    assert_eq!(source_count, 1);

    let complete_ids: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            RelayEvent::Complete { message_id, .. } => Some(message_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(complete_ids.len(), 2, "user complete plus terminal complete");
    assert!(
        matches!(events.last(), Some(RelayEvent::Complete { .. })),
        "stream must end with its terminal event"
    );

    // Persisted assistant message matches the accumulated stream
    let repo = ConversationRepo::new(db);
    let messages = repo.list_recent_messages(&thread.id, 10).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Apple reported...");
    assert_eq!(messages[1].id, complete_ids[1]);
    assert_eq!(messages[1].sources.len(), 1);
    assert_eq!(messages[1].sources[0].url, "https://example.com");
}

#[tokio::test]
async fn streaming_turn_emits_single_terminal_error_when_upstream_down() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "t");

    // Nothing listens here; the connection fails before any bytes arrive
    let compute = HttpComputeService::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
    let relay = Relay::new(
        ConversationRepo::new(db.clone()),
        ContextBuilder::new(ContextConfig::default()),
        Arc::new(compute),
    );

    let rx = relay
        .stream_message("u1", &thread.id, "query", None)
        .await
        .expect("validation and user persist succeed before the upstream call");
    let events = drain(rx).await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], RelayEvent::Complete { .. }));
    assert!(matches!(&events[1], RelayEvent::Error { .. }));

    let repo = ConversationRepo::new(db);
    let messages = repo.list_recent_messages(&thread.id, 10).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].metadata.as_ref().unwrap()["error"], true);
}

#[tokio::test]
async fn streaming_turn_rejects_non_owner_without_persisting() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "owner", "t");

    let relay = build_relay(&db, UpstreamScript::Stream(Vec::new())).await;

    let result = relay.stream_message("intruder", &thread.id, "query", None).await;
    assert!(result.is_err());

    let repo = ConversationRepo::new(db);
    assert!(repo.list_recent_messages(&thread.id, 10).unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_turns_both_persist() {
    let db = setup_test_db();
    let thread = create_test_thread(&db, "u1", "t");

    let relay = build_relay(
        &db,
        UpstreamScript::Blocking(serde_json::json!({"content": "answer"})),
    )
    .await;

    // No per-thread serialization: both turns complete independently
    let (a, b) = tokio::join!(
        relay.send_message("u1", &thread.id, "first", None),
        relay.send_message("u1", &thread.id, "second", None),
    );
    a.unwrap();
    b.unwrap();

    let repo = ConversationRepo::new(db);
    let messages = repo.list_recent_messages(&thread.id, 10).unwrap();
    assert_eq!(messages.len(), 4);
}
