//! Filesystem capture store.
//!
//! The voice transport writes per-speaker PCM into files this store
//! hands out; the store itself only manages paths and lifecycle. Each
//! session owns one directory, read and deleted only by that session's
//! cleanup.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{AudioCapture, AudioRef};

/// Per-session directories of per-participant capture files
pub struct FsCaptureStore {
    base_dir: PathBuf,
}

impl FsCaptureStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.base_dir.join(session_id.to_string())
    }

    fn capture_path(&self, session_id: Uuid, participant_id: &str) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{}.wav", participant_id))
    }

    async fn audio_ref(&self, path: PathBuf, participant_id: String) -> Result<AudioRef> {
        let meta = fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat capture file: {}", path.display()))?;

        Ok(AudioRef {
            participant_id,
            path,
            size_bytes: meta.len(),
        })
    }
}

#[async_trait]
impl AudioCapture for FsCaptureStore {
    async fn start_capture(&self, session_id: Uuid, participant_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create capture directory: {}", dir.display()))?;

        let path = self.capture_path(session_id, participant_id);
        // Resuming after a rejoin appends to the existing file
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open capture file: {}", path.display()))?;

        debug!(session_id = %session_id, participant = participant_id, "Capture started");
        Ok(())
    }

    async fn stop_capture(
        &self,
        session_id: Uuid,
        participant_id: &str,
    ) -> Result<Option<AudioRef>> {
        let path = self.capture_path(session_id, participant_id);
        if !path.exists() {
            return Ok(None);
        }

        let audio = self
            .audio_ref(path, participant_id.to_string())
            .await?;
        debug!(
            session_id = %session_id,
            participant = participant_id,
            size_bytes = audio.size_bytes,
            "Capture stopped"
        );
        Ok(Some(audio))
    }

    async fn stop_all(&self, session_id: Uuid) -> Result<HashMap<String, AudioRef>> {
        let dir = self.session_dir(session_id);
        let mut refs = HashMap::new();

        if !dir.exists() {
            return Ok(refs);
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read capture directory: {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(participant_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
            else {
                continue;
            };

            let audio = self.audio_ref(path, participant_id.clone()).await?;
            refs.insert(participant_id, audio);
        }

        Ok(refs)
    }

    async fn discard(&self, session_id: Uuid) -> Result<()> {
        let dir = self.session_dir(session_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to remove capture directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
