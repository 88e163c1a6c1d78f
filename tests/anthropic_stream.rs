//! SSE parsing tests for the Anthropic backend against a wiremock server.

use serde_json::json;
use tokio_stream::StreamExt as _;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use codecanvas::models::{
    AnthropicBackend, BackendError, ChatMessage, ModelBackend, StopReason, TurnEvent,
};
use codecanvas::tools::tool_metas;

fn backend_for(server: &MockServer) -> AnthropicBackend {
    AnthropicBackend::new(
        "sk-test".to_string(),
        Some(format!("{}/v1/messages", server.uri())),
        "claude-sonnet-4-20250514".to_string(),
    )
}

fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|e| format!("event: {}\ndata: {}\n\n", e["type"].as_str().unwrap(), e))
        .collect()
}

#[tokio::test]
async fn streams_text_then_a_tool_call_assembled_from_json_deltas() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({ "type": "message_start", "message": { "usage": { "input_tokens": 42 } } }),
        json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "text" } }),
        json!({ "type": "content_block_delta", "index": 0,
                "delta": { "type": "text_delta", "text": "Creating " } }),
        json!({ "type": "content_block_delta", "index": 0,
                "delta": { "type": "text_delta", "text": "the file." } }),
        json!({ "type": "content_block_stop", "index": 0 }),
        json!({ "type": "content_block_start", "index": 1,
                "content_block": { "type": "tool_use", "id": "toolu_1", "name": "editor" } }),
        json!({ "type": "content_block_delta", "index": 1,
                "delta": { "type": "input_json_delta",
                           "partial_json": "{\"command\":\"create\",\"pa" } }),
        json!({ "type": "content_block_delta", "index": 1,
                "delta": { "type": "input_json_delta",
                           "partial_json": "th\":\"/App.jsx\",\"file_text\":\"X\"}" } }),
        json!({ "type": "content_block_stop", "index": 1 }),
        json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" },
                "usage": { "output_tokens": 17 } }),
        json!({ "type": "message_stop" }),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({ "stream": true, "max_tokens": 10_000 })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let messages = vec![ChatMessage::new("user", "make a counter")];
    let tools = tool_metas();

    let events: Vec<TurnEvent> = backend
        .stream_turn(&messages, &tools, 10_000)
        .collect::<Result<Vec<_>, _>>()
        .await
        .unwrap();

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::TextDelta(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Creating the file.");

    let call = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::ToolCall(c) => Some(c),
            _ => None,
        })
        .unwrap();
    assert_eq!(call.id, "toolu_1");
    assert_eq!(call.name, "editor");
    assert_eq!(call.arguments["path"], "/App.jsx");

    let Some(TurnEvent::EndOfTurn { stop_reason, usage }) = events.last() else {
        panic!("missing EndOfTurn");
    };
    assert_eq!(*stop_reason, StopReason::ToolUse);
    let usage = usage.unwrap();
    assert_eq!(usage.input_tokens, 42);
    assert_eq!(usage.output_tokens, 17);
}

#[tokio::test]
async fn non_success_status_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let messages = vec![ChatMessage::new("user", "hi")];
    let result: Result<Vec<TurnEvent>, BackendError> =
        backend.stream_turn(&messages, &[], 1000).collect().await;

    let err = result.unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)));
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn truncated_stream_is_malformed() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({ "type": "message_start", "message": { "usage": { "input_tokens": 1 } } }),
        json!({ "type": "content_block_delta", "index": 0,
                "delta": { "type": "text_delta", "text": "partial" } }),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let messages = vec![ChatMessage::new("user", "hi")];
    let events: Vec<Result<TurnEvent, BackendError>> =
        backend.stream_turn(&messages, &[], 1000).collect().await;

    // The text that did arrive is surfaced, then the stream errors out.
    assert!(matches!(
        events.first(),
        Some(Ok(TurnEvent::TextDelta(t))) if t == "partial"
    ));
    assert!(matches!(
        events.last(),
        Some(Err(BackendError::Malformed(_)))
    ));
}

#[tokio::test]
async fn unparseable_tool_input_is_malformed() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({ "type": "message_start", "message": { "usage": { "input_tokens": 1 } } }),
        json!({ "type": "content_block_start", "index": 0,
                "content_block": { "type": "tool_use", "id": "toolu_1", "name": "editor" } }),
        json!({ "type": "content_block_delta", "index": 0,
                "delta": { "type": "input_json_delta", "partial_json": "{\"command\": nope" } }),
        json!({ "type": "content_block_stop", "index": 0 }),
        json!({ "type": "message_stop" }),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let messages = vec![ChatMessage::new("user", "hi")];
    let events: Vec<Result<TurnEvent, BackendError>> =
        backend.stream_turn(&messages, &[], 1000).collect().await;

    assert!(events
        .iter()
        .any(|e| matches!(e, Err(BackendError::Malformed(_)))));
}
