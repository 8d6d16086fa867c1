//! HTTP client for the transcription service.
//!
//! The service is job-based: upload one audio file per participant,
//! receive a job id, poll until the job completes or fails. Network
//! errors and 5xx responses are transient; rejected uploads and failed
//! jobs are terminal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::domain::TranscriptSegment;

use super::{AudioRef, StageError, TranscriptionBackend};

/// How often to poll a submitted job
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Give up polling after this many rounds (counts as transient: the
/// service accepted the job but never finished it)
const MAX_POLLS: u32 = 240;

/// Job-based transcription service client
pub struct TranscriptionClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
    transcript: Option<String>,
    error: Option<String>,
}

impl TranscriptionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn submit(&self, audio: &AudioRef) -> Result<String, StageError> {
        let bytes = tokio::fs::read(&audio.path).await.map_err(|e| {
            StageError::Terminal(format!(
                "audio file unreadable for {}: {}",
                audio.participant_id, e
            ))
        })?;

        let file_name = audio
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.wav", audio.participant_id));

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| StageError::Terminal(format!("invalid mime type: {}", e)))?;

        let form = Form::new()
            .text("user_id", audio.participant_id.clone())
            .part("file", part);

        let response = self
            .client
            .post(self.url("transcribe"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| StageError::Transient(format!("transcription upload failed: {}", e)))?;

        let response = check_status(response)?;
        let job: JobResponse = response
            .json()
            .await
            .map_err(|e| StageError::Transient(format!("bad transcription response: {}", e)))?;

        Ok(job.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<String, StageError> {
        for _ in 0..MAX_POLLS {
            let response = self
                .client
                .get(self.url(&format!("jobs/{}", job_id)))
                .send()
                .await
                .map_err(|e| StageError::Transient(format!("job poll failed: {}", e)))?;

            let response = check_status(response)?;
            let status: JobStatus = response
                .json()
                .await
                .map_err(|e| StageError::Transient(format!("bad job status: {}", e)))?;

            match status.status.as_str() {
                "completed" => {
                    return status.transcript.ok_or_else(|| {
                        StageError::Terminal("completed job carried no transcript".to_string())
                    })
                }
                "failed" => {
                    return Err(StageError::Terminal(format!(
                        "transcription job failed: {}",
                        status.error.unwrap_or_default()
                    )))
                }
                other => {
                    debug!(job_id, status = other, "Transcription job still running");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        Err(StageError::Transient(format!(
            "transcription job {} did not finish in time",
            job_id
        )))
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StageError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(StageError::Transient(format!(
            "transcription service returned {}",
            status
        )))
    } else {
        Err(StageError::Terminal(format!(
            "transcription service rejected request: {}",
            status
        )))
    }
}

#[async_trait]
impl TranscriptionBackend for TranscriptionClient {
    async fn transcribe(
        &self,
        refs: &HashMap<String, AudioRef>,
    ) -> Result<Vec<TranscriptSegment>, StageError> {
        // Deterministic participant order; offsets are rebased by the
        // stage after return.
        let mut ordered: Vec<&AudioRef> = refs.values().collect();
        ordered.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));

        let mut segments = Vec::with_capacity(ordered.len());
        for audio in ordered {
            let job_id = self.submit(audio).await?;
            let text = self.poll(&job_id).await?;

            if text.trim().is_empty() {
                continue;
            }
            segments.push(TranscriptSegment {
                participant_id: audio.participant_id.clone(),
                text,
                start_offset: 0,
                end_offset: 0,
            });
        }

        Ok(segments)
    }
}
