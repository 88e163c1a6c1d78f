//! HTTP gateway.
//!
//! Serves:
//! - `POST /api/chat`   — run the agent over a conversation + snapshot;
//!   replies with a newline-delimited JSON stream of [`RunEvent`]s
//! - `GET  /api/status` — returns `{ "status": "ok", … }`
//!
//! The service is stateless between requests: the client sends the
//! whole tree in, and the terminal event carries the whole tree out.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::models::{ChatMessage, ModelBackend};
use crate::orchestrator::{Orchestrator, RunRequest};
use crate::vfs::snapshot::{self, Snapshot};

/// Shared per-request state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub backend_name: &'static str,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,
    /// The client's tree as a flat snapshot.  Missing means empty.
    #[serde(default)]
    pub files: Snapshot,
    /// When present, the finished run is persisted under this id.
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Build the application router.
pub fn router(orchestrator: Orchestrator, backend: &Arc<dyn ModelBackend>) -> Router {
    let state = AppState {
        orchestrator,
        backend_name: backend.name(),
    };
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(addr: &str, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "backend": state.backend_name,
        "max_steps": state.orchestrator.max_steps(),
    }))
}

/// Run the agent and stream its events as NDJSON.
///
/// A snapshot that cannot form a tree is the one client error rejected
/// up front with a 400; everything after that point streams, with
/// failures delivered in-band as a terminal `failed` event.
async fn chat_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let fs = match snapshot::deserialize(&request.files) {
        Ok(fs) => fs,
        Err(e) => {
            warn!(error = %e, "rejected chat request");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let run = RunRequest {
        messages: request.messages,
        fs,
        project_id: request.project_id,
    };

    // Cancelling on disconnect: when the client goes away axum drops the
    // body stream, which drops the guard and cancels the run.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let events = state.orchestrator.run(run, cancel);
    let lines = events.map(move |event| {
        let _guard = &guard;
        let mut line = serde_json::to_string(&event).unwrap_or_else(|e| {
            warn!(error = %e, "failed to serialize run event");
            r#"{"type":"failed","message":"event serialization failed"}"#.to_string()
        });
        line.push('\n');
        Ok::<_, std::convert::Infallible>(line)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(lines))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_accepts_missing_files() {
        let request: ChatRequest = serde_json::from_str(
            r#"{ "messages": [{ "role": "user", "content": "hi" }] }"#,
        )
        .unwrap();
        assert!(request.files.is_empty());
        assert!(request.project_id.is_none());
    }

    #[test]
    fn chat_request_parses_wire_snapshot() {
        let request: ChatRequest = serde_json::from_str(
            r#"{
                "messages": [],
                "files": { "/App.jsx": { "type": "file", "content": "X" } },
                "project_id": "p1"
            }"#,
        )
        .unwrap();
        assert_eq!(request.files.len(), 1);
        assert_eq!(request.project_id.as_deref(), Some("p1"));
    }
}
