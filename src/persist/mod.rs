//! Persistence of finished runs.
//!
//! The orchestrator calls the hook at most once per run, after the
//! terminal event is known and only when the client supplied a project
//! id.  Persistence failures are logged by the caller and never affect
//! the run outcome the client sees.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::ChatMessage;
use crate::vfs::snapshot::Snapshot;

/// Callback fired once when a run reaches its terminal state.
#[async_trait]
pub trait PersistenceHook: Send + Sync {
    async fn on_finish(
        &self,
        project_id: &str,
        messages: &[ChatMessage],
        files: &Snapshot,
    ) -> anyhow::Result<()>;
}

/// What gets written to disk for a project.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub messages: Vec<ChatMessage>,
    pub files: Snapshot,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

/// File-backed store: one JSON document per project under a root
/// directory.
pub struct JsonProjectStore {
    root: PathBuf,
}

impl JsonProjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn record_path(&self, project_id: &str) -> anyhow::Result<PathBuf> {
        // Project ids come from clients; keep them from escaping the
        // store directory.
        if project_id.is_empty()
            || project_id.contains(['/', '\\'])
            || project_id.contains("..")
        {
            anyhow::bail!("invalid project id: {project_id:?}");
        }
        Ok(self.root.join(format!("{project_id}.json")))
    }

    /// Load a previously saved project, or `None` if it was never saved.
    pub async fn load(&self, project_id: &str) -> anyhow::Result<Option<ProjectRecord>> {
        let path = self.record_path(project_id)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read project: {}", path.display()));
            }
        };
        let record = serde_json::from_str(&contents)
            .with_context(|| format!("corrupt project record: {}", path.display()))?;
        Ok(Some(record))
    }
}

#[async_trait]
impl PersistenceHook for JsonProjectStore {
    async fn on_finish(
        &self,
        project_id: &str,
        messages: &[ChatMessage],
        files: &Snapshot,
    ) -> anyhow::Result<()> {
        let path = self.record_path(project_id)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create data dir: {}", self.root.display()))?;

        let record = ProjectRecord {
            messages: messages.to_vec(),
            files: files.clone(),
            saved_at: chrono::Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&record).context("serialize project record")?;

        // Write-then-rename so a crash mid-write never corrupts the
        // previous record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("failed to write project: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to commit project: {}", path.display()))?;

        debug!(project_id, path = %path.display(), "project saved");
        Ok(())
    }
}
