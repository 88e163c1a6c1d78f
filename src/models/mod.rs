//! Text-generation backends.
//!
//! Defines the [`ModelBackend`] trait, the [`ChatMessage`] type, the
//! [`TurnEvent`] stream vocabulary, and the concrete implementations
//! ([`AnthropicBackend`], [`MockBackend`]).  A backend turns a
//! conversation plus tool definitions into one streamed assistant turn;
//! the loop around repeated turns lives in the orchestrator.

pub mod anthropic;
pub mod mock;

use std::pin::Pin;

use futures_core::Stream;
use thiserror::Error;
use tracing::warn;

use crate::config::ModelConfig;
use crate::tools::{ToolInvocation, ToolMeta};

pub use anthropic::AnthropicBackend;
pub use mock::MockBackend;

// ---------------------------------------------------------------------------
// ChatMessage – shared message representation
// ---------------------------------------------------------------------------

/// A single chat message with a role and content.
///
/// Assistant messages that invoked tools carry the raw `tool_calls`
/// array; `role: "tool"` messages carry the id of the call they answer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Convenience constructor for a plain message (no tool metadata).
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant turn that requested tool invocations.
    pub fn assistant_with_tools(content: impl Into<String>, calls: &[ToolInvocation]) -> Self {
        let tool_calls = calls
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "name": c.name,
                    "arguments": c.arguments,
                })
            })
            .collect();
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// A tool-result message answering the call with the given id.
    pub fn tool_result(call_id: impl Into<String>, payload: &serde_json::Value) -> Self {
        Self {
            role: "tool".to_string(),
            content: payload.to_string(),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Turn events
// ---------------------------------------------------------------------------

/// Why the backend stopped producing content for this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model finished its reply.
    EndTurn,
    /// The model wants its tool calls executed before continuing.
    ToolUse,
    /// The per-turn output-token ceiling cut the reply short.
    MaxTokens,
}

/// Token usage reported by the API for one turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One event in a streamed assistant turn.
///
/// A well-formed turn is any number of `TextDelta` / `ToolCall` events
/// followed by exactly one `EndOfTurn`.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Incremental assistant text.
    TextDelta(String),
    /// A fully-assembled tool invocation (arguments already parsed).
    ToolCall(ToolInvocation),
    /// Terminal event for the turn.
    EndOfTurn {
        stop_reason: StopReason,
        usage: Option<TokenUsage>,
    },
}

/// Failures talking to a backend.  These abort the run, unlike tool
/// errors which flow back into the conversation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend transport failure: {0}")]
    Transport(String),
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// A streamed assistant turn.
pub type TurnStream<'a> = Pin<Box<dyn Stream<Item = Result<TurnEvent, BackendError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// ModelBackend trait
// ---------------------------------------------------------------------------

/// Trait implemented by every text-generation backend.
///
/// `stream_turn` produces one assistant turn for the given conversation
/// and tool definitions.  It is not a request/response call: text and
/// tool invocations are surfaced as they arrive so the orchestrator can
/// forward them to its own event stream.
pub trait ModelBackend: Send + Sync {
    /// Stream one assistant turn.
    fn stream_turn<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        tools: &'a [ToolMeta],
        max_output_tokens: u32,
    ) -> TurnStream<'a>;

    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Whether this is the credential-less fallback backend.  The
    /// orchestrator tightens the step budget when it is.
    fn is_fallback(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Backend factory
// ---------------------------------------------------------------------------

/// Build the backend for a run.
///
/// Selects [`AnthropicBackend`] when an API key can be resolved from the
/// config (directly, via `$VAR` reference, or from `ANTHROPIC_API_KEY`);
/// otherwise falls back to the deterministic [`MockBackend`] so the
/// service stays usable in development without credentials.
pub fn build_backend(cfg: &ModelConfig) -> Box<dyn ModelBackend> {
    if cfg.provider != "anthropic" {
        warn!(provider = %cfg.provider, "unknown provider, using deterministic mock backend");
        return Box::new(MockBackend::new());
    }
    match cfg.resolve_api_key() {
        Some(api_key) => Box::new(AnthropicBackend::new(
            api_key,
            cfg.endpoint.clone(),
            cfg.model.clone(),
        )),
        None => {
            warn!("no model credentials found, using deterministic mock backend");
            Box::new(MockBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_message_shape() {
        let msg = ChatMessage::tool_result("call_9", &serde_json::json!({ "created": true }));
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        assert!(msg.content.contains("created"));
    }

    #[test]
    fn assistant_with_tools_carries_raw_calls() {
        let calls = vec![ToolInvocation {
            id: "call_1".to_string(),
            name: "editor".to_string(),
            arguments: serde_json::json!({ "command": "view", "path": "/" }),
        }];
        let msg = ChatMessage::assistant_with_tools("", &calls);
        let tcs = msg.tool_calls.unwrap();
        assert_eq!(tcs.len(), 1);
        assert_eq!(tcs[0]["name"], "editor");
    }

    #[test]
    fn factory_falls_back_without_credentials() {
        let cfg = ModelConfig {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: None,
            endpoint: None,
        };
        // No ANTHROPIC_API_KEY in the test environment by default; skip
        // when the host has one set.
        if std::env::var("ANTHROPIC_API_KEY").is_err() {
            let backend = build_backend(&cfg);
            assert!(backend.is_fallback());
            assert_eq!(backend.name(), "mock");
        }
    }
}
