//! Append-only session audit log.
//!
//! One newline-delimited JSON file per session. The log is an audit
//! trail for the CLI, not the source of truth for live state; failing
//! to write it never fails the session.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{SessionEvent, SessionEventKind};

/// JSONL log for one session
pub struct SessionLog {
    events_path: PathBuf,
}

impl SessionLog {
    /// Create or open the log for a session under `<base>/<session_id>/`
    pub async fn open(base_dir: &Path, session_id: Uuid) -> Result<Self> {
        let session_dir = base_dir.join(session_id.to_string());

        fs::create_dir_all(&session_dir)
            .await
            .with_context(|| format!("Failed to create session directory: {}", session_dir.display()))?;

        Ok(Self {
            events_path: session_dir.join("events.jsonl"),
        })
    }

    /// Path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Append an event to the log
    pub async fn append(&self, event: &SessionEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!("Failed to open events file: {}", self.events_path.display())
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize session event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write session event")?;
        file.flush().await.context("Failed to flush session event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<SessionEvent>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: SessionEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse session event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// The terminal outcome recorded in this log, if any
    pub async fn outcome(&self) -> Result<Option<SessionEventKind>> {
        let events = self.replay().await?;
        Ok(events
            .into_iter()
            .rev()
            .map(|e| e.kind)
            .find(|k| {
                matches!(
                    k,
                    SessionEventKind::Published
                        | SessionEventKind::ManualReviewFlagged
                        | SessionEventKind::Failed
                        | SessionEventKind::Cancelled
                )
            }))
    }

    /// List all session ids under the base directory
    pub async fn list_sessions(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        sessions.push(uuid);
                    }
                }
            }
        }

        Ok(sessions)
    }
}
