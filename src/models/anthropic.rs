//! Anthropic Messages API backend with SSE streaming.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{BackendError, ChatMessage, ModelBackend, StopReason, TokenUsage, TurnEvent, TurnStream};
use crate::tools::{ToolInvocation, ToolMeta};

/// Default endpoint for the Messages API.
pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

const API_VERSION: &str = "2023-06-01";

/// Backend that talks to the Anthropic Messages API.
pub struct AnthropicBackend {
    api_key: String,
    endpoint: String,
    client: Client,
    /// Model name sent in the request body.
    model: String,
}

impl AnthropicBackend {
    /// Create a backend with explicit configuration.  The endpoint
    /// override is for tests and proxies; `None` uses the public API.
    pub fn new(api_key: String, endpoint: Option<String>, model: String) -> Self {
        Self {
            api_key,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
            model,
        }
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolMeta],
        max_output_tokens: u32,
    ) -> Value {
        let (system, api_messages) = to_api_messages(messages);

        let api_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.args_schema,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": max_output_tokens,
            "messages": api_messages,
            "stream": true,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !api_tools.is_empty() {
            body["tools"] = Value::Array(api_tools);
        }
        body
    }
}

impl ModelBackend for AnthropicBackend {
    fn stream_turn<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        tools: &'a [ToolMeta],
        max_output_tokens: u32,
    ) -> TurnStream<'a> {
        Box::pin(async_stream::try_stream! {
            let body = self.request_body(messages, tools, max_output_tokens);

            let resp = self
                .client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                Err(BackendError::Transport(format!(
                    "Anthropic API returned {status}: {text}"
                )))?;
                return;
            }

            // Parse SSE lines incrementally from the byte stream so text
            // deltas are surfaced as they arrive.
            use tokio_stream::StreamExt as _;
            let mut byte_stream = resp.bytes_stream();
            let mut buffer = String::new();

            // The tool_use block currently being assembled, if any:
            // (id, name, accumulated partial JSON).
            let mut open_tool: Option<(String, String, String)> = None;
            let mut input_tokens: u64 = 0;
            let mut output_tokens: u64 = 0;
            let mut stop_reason = StopReason::EndTurn;

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim_end().to_string();
                    buffer = buffer[newline_pos + 1..].to_string();

                    if !line.starts_with("data: ") {
                        continue;
                    }
                    let data = &line[6..];
                    let event: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    match event["type"].as_str().unwrap_or("") {
                        "message_start" => {
                            input_tokens = event["message"]["usage"]["input_tokens"]
                                .as_u64()
                                .unwrap_or(0);
                        }
                        "content_block_start" => {
                            let block = &event["content_block"];
                            if block["type"] == "tool_use" {
                                let id = block["id"].as_str().unwrap_or("").to_string();
                                let name = block["name"].as_str().unwrap_or("").to_string();
                                open_tool = Some((id, name, String::new()));
                            }
                        }
                        "content_block_delta" => {
                            let delta = &event["delta"];
                            if let Some(text) = delta["text"].as_str() {
                                if !text.is_empty() {
                                    yield TurnEvent::TextDelta(text.to_string());
                                }
                            } else if let Some(partial) = delta["partial_json"].as_str() {
                                if let Some((_, _, ref mut acc)) = open_tool {
                                    acc.push_str(partial);
                                }
                            }
                        }
                        "content_block_stop" => {
                            if let Some((id, name, acc)) = open_tool.take() {
                                let arguments = if acc.trim().is_empty() {
                                    json!({})
                                } else {
                                    serde_json::from_str(&acc).map_err(|e| {
                                        BackendError::Malformed(format!(
                                            "unparseable tool_use input for {name}: {e}"
                                        ))
                                    })?
                                };
                                debug!(tool = %name, id = %id, "assembled tool invocation");
                                yield TurnEvent::ToolCall(ToolInvocation { id, name, arguments });
                            }
                        }
                        "message_delta" => {
                            if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                                stop_reason = match reason {
                                    "tool_use" => StopReason::ToolUse,
                                    "max_tokens" => StopReason::MaxTokens,
                                    _ => StopReason::EndTurn,
                                };
                            }
                            if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                                output_tokens = out;
                            }
                        }
                        "message_stop" => {
                            yield TurnEvent::EndOfTurn {
                                stop_reason,
                                usage: Some(TokenUsage {
                                    input_tokens,
                                    output_tokens,
                                }),
                            };
                            return;
                        }
                        _ => {}
                    }
                }
            }

            // Connection ended without a message_stop.
            Err(BackendError::Malformed(
                "event stream ended before message_stop".to_string(),
            ))?;
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// Convert the neutral conversation into the Messages API shape.
///
/// The system prompt is lifted out of the message list; assistant
/// `tool_calls` become `tool_use` content blocks; consecutive
/// `role: "tool"` messages merge into a single user message of
/// `tool_result` blocks, as the API requires.
fn to_api_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut out: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role.as_str() {
            "system" => {
                system = Some(msg.content.clone());
            }
            "assistant" => {
                let mut blocks: Vec<Value> = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": msg.content }));
                }
                if let Some(ref calls) = msg.tool_calls {
                    for call in calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call["id"],
                            "name": call["name"],
                            "input": call["arguments"],
                        }));
                    }
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            "tool" => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id,
                    "content": msg.content,
                });
                // Append to a trailing tool_result user message if one
                // is already open.
                let appended = out
                    .last_mut()
                    .filter(|last| {
                        last["role"] == "user"
                            && last["content"][0]["type"] == "tool_result"
                    })
                    .and_then(|last| last["content"].as_array_mut())
                    .map(|blocks| blocks.push(block.clone()))
                    .is_some();
                if !appended {
                    out.push(json!({ "role": "user", "content": [block] }));
                }
            }
            _ => {
                out.push(json!({ "role": "user", "content": msg.content }));
            }
        }
    }

    (system, out)
}
