//! Tool contracts: the mutation protocol between the model and the tree.
//!
//! Two tools are exposed to the text-generation backend: [`editor`]
//! (view / create / surgical text edits) and [`manager`] (rename /
//! delete).  Each tool is a pure function `(fs, arguments) -> payload`
//! plus a JSON-Schema [`ToolMeta`] describing its arguments.
//!
//! Arguments are validated *before* the file system is touched — a
//! malformed invocation never partially mutates state.  Tool failures are
//! converted into structured error payloads and fed back to the model as
//! ordinary turn content; they are never orchestrator failures.

pub mod editor;
pub mod manager;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::vfs::VirtualFileSystem;

// ---------------------------------------------------------------------------
// Tool metadata
// ---------------------------------------------------------------------------

/// Metadata describing a tool available to the backend.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolMeta {
    /// Short machine-friendly name (e.g. `"editor"`).
    pub name: String,
    /// Human-readable one-liner describing what the tool does.
    pub description: String,
    /// JSON Schema object describing the expected arguments.
    pub args_schema: Value,
}

/// Metadata for every tool the orchestrator offers, in a stable order.
pub fn tool_metas() -> Vec<ToolMeta> {
    vec![editor::meta(), manager::meta()]
}

// ---------------------------------------------------------------------------
// Invocations and results
// ---------------------------------------------------------------------------

/// A structured tool request produced by the backend.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolInvocation {
    /// Backend-assigned id correlating the result back to this call.
    pub id: String,
    /// Tool name (`"editor"` or `"manager"`).
    pub name: String,
    /// Raw JSON arguments, validated by the tool itself.
    pub arguments: Value,
}

/// A typed tool failure.  `kind` is a stable machine-readable tag from
/// the error taxonomy; `message` is the human-readable detail shown to
/// the model.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: &'static str,
    pub message: String,
}

impl ToolError {
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_arguments",
            message: message.into(),
        }
    }

    pub fn unsupported_command(command: &str) -> Self {
        Self {
            kind: "unsupported_command",
            message: format!("unsupported command: {command}"),
        }
    }
}

impl From<crate::vfs::FsError> for ToolError {
    fn from(err: crate::vfs::FsError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of applying one invocation: success payload or typed error.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub outcome: Result<Value, ToolError>,
}

impl ToolResult {
    /// The JSON payload appended to the conversation as a tool message.
    ///
    /// Errors become `{ "error": { "kind": …, "message": … } }` so the
    /// model can recognize the failure and retry with corrected
    /// arguments.
    pub fn payload(&self) -> Value {
        match &self.outcome {
            Ok(value) => value.clone(),
            Err(e) => json!({ "error": { "kind": e.kind, "message": e.message } }),
        }
    }

    pub fn is_err(&self) -> bool {
        self.outcome.is_err()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Apply one invocation against the given tree.
///
/// Always returns a [`ToolResult`]; an unknown tool name is itself a
/// structured error rather than a panic, since it originates from the
/// backend and must flow back into the conversation.
pub fn dispatch(fs: &mut VirtualFileSystem, invocation: &ToolInvocation) -> ToolResult {
    debug!(tool = %invocation.name, id = %invocation.id, "applying tool invocation");
    let outcome = match invocation.name.as_str() {
        "editor" => editor::run(fs, &invocation.arguments),
        "manager" => manager::run(fs, &invocation.arguments),
        other => Err(ToolError {
            kind: "unknown_tool",
            message: format!("unknown tool: {other}"),
        }),
    };
    ToolResult {
        id: invocation.id.clone(),
        name: invocation.name.clone(),
        outcome,
    }
}

/// Shared command-envelope parsing for both tools.
///
/// Distinguishes the two argument failure modes the taxonomy requires:
/// a `command` value outside the tool's closed set is
/// `unsupported_command`; any other shape problem (missing field, wrong
/// type, non-object arguments) is `invalid_arguments`.
pub(crate) fn parse_command<T: serde::de::DeserializeOwned>(
    args: &Value,
    allowed: &[&str],
) -> Result<T, ToolError> {
    if !args.is_object() {
        return Err(ToolError::invalid_arguments(
            "tool arguments must be a JSON object",
        ));
    }
    let command = args
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_arguments("missing required field `command`"))?;
    if !allowed.contains(&command) {
        return Err(ToolError::unsupported_command(command));
    }
    serde_json::from_value(args.clone())
        .map_err(|e| ToolError::invalid_arguments(format!("invalid arguments for {command}: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
