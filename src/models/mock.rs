//! Deterministic credential-less backend.
//!
//! Used when no API key is configured so the whole pipeline — tool
//! dispatch, snapshot round-trip, event stream — stays exercisable in
//! development and tests.  The scripted behavior is: first turn creates
//! a placeholder `/App.jsx`, the next turn replies with a short text and
//! ends the run.

use serde_json::json;

use super::{ChatMessage, ModelBackend, StopReason, TokenUsage, TurnEvent, TurnStream};
use crate::tools::{ToolInvocation, ToolMeta};

const PLACEHOLDER_APP: &str = r#"export default function App() {
  return (
    <div className="p-8">
      <h1 className="text-2xl font-bold">Hello from the mock backend</h1>
      <p>Configure an API key to generate a real app.</p>
    </div>
  );
}
"#;

#[derive(Default)]
pub struct MockBackend;

impl MockBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ModelBackend for MockBackend {
    fn stream_turn<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        _tools: &'a [ToolMeta],
        _max_output_tokens: u32,
    ) -> TurnStream<'a> {
        // Scripted on conversation shape rather than internal state, so
        // repeated runs over the same messages behave identically.
        let has_tool_results = messages.iter().any(|m| m.role == "tool");

        Box::pin(async_stream::try_stream! {
            if !has_tool_results {
                yield TurnEvent::TextDelta("Creating a placeholder app.".to_string());
                yield TurnEvent::ToolCall(ToolInvocation {
                    id: "mock_call_1".to_string(),
                    name: "editor".to_string(),
                    arguments: json!({
                        "command": "create",
                        "path": "/App.jsx",
                        "file_text": PLACEHOLDER_APP,
                    }),
                });
                yield TurnEvent::EndOfTurn {
                    stop_reason: StopReason::ToolUse,
                    usage: Some(TokenUsage::default()),
                };
            } else {
                yield TurnEvent::TextDelta(
                    "Done. I created /App.jsx with a placeholder component.".to_string(),
                );
                yield TurnEvent::EndOfTurn {
                    stop_reason: StopReason::EndTurn,
                    usage: Some(TokenUsage::default()),
                };
            }
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_fallback(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt as _;

    #[tokio::test]
    async fn first_turn_creates_placeholder_then_final_turn_ends() {
        let backend = MockBackend::new();
        let messages = vec![ChatMessage::new("user", "make me an app")];

        let events: Vec<_> = backend
            .stream_turn(&messages, &[], 1000)
            .collect::<Result<Vec<_>, _>>()
            .await
            .unwrap();
        assert!(matches!(
            events.last(),
            Some(TurnEvent::EndOfTurn { stop_reason: StopReason::ToolUse, .. })
        ));
        let call = events
            .iter()
            .find_map(|e| match e {
                TurnEvent::ToolCall(c) => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.name, "editor");
        assert_eq!(call.arguments["path"], "/App.jsx");

        let mut followup = messages.clone();
        followup.push(ChatMessage::tool_result("mock_call_1", &json!({ "created": true })));
        let events: Vec<_> = backend
            .stream_turn(&followup, &[], 1000)
            .collect::<Result<Vec<_>, _>>()
            .await
            .unwrap();
        assert!(matches!(
            events.last(),
            Some(TurnEvent::EndOfTurn { stop_reason: StopReason::EndTurn, .. })
        ));
    }
}
