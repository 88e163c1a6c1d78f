//! The run loop: repeated assistant turns against the tool surface.
//!
//! One run takes a conversation and a tree, drives the backend until it
//! stops asking for tools (or a budget/cancellation intervenes), and
//! emits a stream of [`RunEvent`]s that ends in exactly one terminal
//! event.  Tool failures are fed back to the model as ordinary turn
//! content; only backend transport/shape failures abort the run.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::BudgetConfig;
use crate::models::{ChatMessage, ModelBackend, StopReason, TurnEvent};
use crate::persist::PersistenceHook;
use crate::prompts::GENERATION_PROMPT;
use crate::tools::{self, ToolInvocation, ToolResult};
use crate::vfs::snapshot::{self, Snapshot};
use crate::vfs::VirtualFileSystem;

// ---------------------------------------------------------------------------
// Run events
// ---------------------------------------------------------------------------

/// Why a run reached its terminal [`RunEvent::Finished`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model ended its reply without requesting more tools.
    Done,
    /// The step ceiling was hit while the model still wanted tools.
    BudgetExhausted,
    /// The client went away or cancelled the run.
    Cancelled,
}

/// One event in a run's output stream.
///
/// Every stream ends with exactly one `Finished` or `Failed`; both
/// terminal variants are followed by nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Incremental assistant text.
    TextDelta { text: String },
    /// A tool invocation is about to be applied.
    ToolStarted {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The invocation's outcome, success or structured error.
    ToolCompleted {
        id: String,
        name: String,
        payload: serde_json::Value,
        is_error: bool,
    },
    /// Normal terminal event: the transcript and the final tree.
    Finished {
        reason: FinishReason,
        messages: Vec<ChatMessage>,
        files: Snapshot,
    },
    /// Abnormal terminal event.  The message is deliberately generic;
    /// detail goes to the logs, not to the client.
    Failed { message: String },
}

/// Everything one run needs from the caller.
pub struct RunRequest {
    /// Client conversation, oldest first.  No system message — the
    /// orchestrator seeds its own.
    pub messages: Vec<ChatMessage>,
    /// The tree to operate on, already decoded from the wire snapshot.
    pub fs: VirtualFileSystem,
    /// When present, the finished run is handed to the persistence hook
    /// under this id.
    pub project_id: Option<String>,
}

pub type RunStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives runs.  Cheap to clone per request via the inner `Arc`s.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn ModelBackend>,
    budgets: BudgetConfig,
    hook: Option<Arc<dyn PersistenceHook>>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        budgets: BudgetConfig,
        hook: Option<Arc<dyn PersistenceHook>>,
    ) -> Self {
        Self {
            backend,
            budgets,
            hook,
        }
    }

    /// The step ceiling for this orchestrator's backend.
    pub fn max_steps(&self) -> usize {
        if self.backend.is_fallback() {
            self.budgets.fallback_max_steps
        } else {
            self.budgets.max_steps
        }
    }

    /// Run one request to completion.
    ///
    /// The returned stream is infallible from the caller's point of
    /// view: failures surface as a terminal [`RunEvent::Failed`].
    pub fn run(&self, request: RunRequest, cancel: CancellationToken) -> RunStream {
        let orchestrator = self.clone();
        let max_steps = self.max_steps();
        let max_output_tokens = self.budgets.max_output_tokens;

        Box::pin(async_stream::stream! {
            let RunRequest { messages: client_messages, mut fs, project_id } = request;

            let mut conversation = vec![ChatMessage::new("system", GENERATION_PROMPT)];
            conversation.extend(client_messages);

            let tools = tools::tool_metas();
            let backend = orchestrator.backend.clone();
            let run_id = uuid::Uuid::new_v4();
            info!(%run_id, backend = backend.name(), max_steps, "run started");

            let mut finish = FinishReason::BudgetExhausted;

            'steps: for step in 0..max_steps {
                let mut assistant_text = String::new();
                let mut invocations: Vec<ToolInvocation> = Vec::new();
                let mut results: Vec<ToolResult> = Vec::new();
                let mut stop_reason = StopReason::EndTurn;

                {
                    let mut turn = backend.stream_turn(&conversation, &tools, max_output_tokens);
                    loop {
                        let event = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                info!(step, "run cancelled");
                                finish = FinishReason::Cancelled;
                                break 'steps;
                            }
                            event = turn.next() => event,
                        };
                        let event = match event {
                            Some(Ok(event)) => event,
                            Some(Err(e)) => {
                                error!(step, error = %e, "backend turn failed");
                                yield RunEvent::Failed {
                                    message: "the model backend failed; see server logs".to_string(),
                                };
                                return;
                            }
                            None => break,
                        };

                        match event {
                            TurnEvent::TextDelta(text) => {
                                assistant_text.push_str(&text);
                                yield RunEvent::TextDelta { text };
                            }
                            TurnEvent::ToolCall(invocation) => {
                                yield RunEvent::ToolStarted {
                                    id: invocation.id.clone(),
                                    name: invocation.name.clone(),
                                    arguments: invocation.arguments.clone(),
                                };
                                let result = tools::dispatch(&mut fs, &invocation);
                                if result.is_err() {
                                    warn!(
                                        step,
                                        tool = %invocation.name,
                                        id = %invocation.id,
                                        "tool invocation failed, feeding error back"
                                    );
                                }
                                yield RunEvent::ToolCompleted {
                                    id: result.id.clone(),
                                    name: result.name.clone(),
                                    payload: result.payload(),
                                    is_error: result.is_err(),
                                };
                                invocations.push(invocation);
                                results.push(result);
                            }
                            TurnEvent::EndOfTurn { stop_reason: reason, usage } => {
                                if let Some(usage) = usage {
                                    tracing::debug!(
                                        step,
                                        input_tokens = usage.input_tokens,
                                        output_tokens = usage.output_tokens,
                                        "turn complete"
                                    );
                                }
                                stop_reason = reason;
                                break;
                            }
                        }
                    }
                }

                // Record the turn in the conversation.
                if invocations.is_empty() {
                    conversation.push(ChatMessage::new("assistant", assistant_text));
                } else {
                    conversation.push(ChatMessage::assistant_with_tools(
                        assistant_text,
                        &invocations,
                    ));
                    for result in &results {
                        conversation.push(ChatMessage::tool_result(
                            result.id.clone(),
                            &result.payload(),
                        ));
                    }
                }

                if stop_reason == StopReason::MaxTokens {
                    warn!(step, "turn truncated by the output-token ceiling");
                    break;
                }
                if stop_reason != StopReason::ToolUse || invocations.is_empty() {
                    finish = FinishReason::Done;
                    break;
                }
            }

            if finish == FinishReason::BudgetExhausted {
                warn!(max_steps, "step budget exhausted before the model finished");
            }

            // The seeded system prompt stays server-side.
            let messages: Vec<ChatMessage> = conversation
                .into_iter()
                .filter(|m| m.role != "system")
                .collect();
            let files = snapshot::serialize(&fs);

            // Fire the hook at most once, only for finished runs.
            if let (Some(hook), Some(project_id)) = (&orchestrator.hook, &project_id) {
                if let Err(e) = hook.on_finish(project_id, &messages, &files).await {
                    error!(project_id, error = %e, "persistence hook failed");
                }
            }

            info!(%run_id, reason = ?finish, files = files.len(), "run finished");
            yield RunEvent::Finished { reason: finish, messages, files };
        })
    }
}
