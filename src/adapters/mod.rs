//! Collaborator interfaces for external systems.
//!
//! The core only sees these traits; concrete implementations (filesystem
//! capture store, HTTP clients for transcription/extraction/messaging)
//! live alongside them in this module.

pub mod capture;
pub mod extraction;
pub mod messaging;
pub mod publisher;
pub mod transcription;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{DecisionCandidate, TranscriptSegment};

pub use capture::FsCaptureStore;
pub use extraction::ExtractionClient;
pub use messaging::MessagingClient;
pub use publisher::ChannelPublisher;
pub use transcription::TranscriptionClient;

/// Reference to one participant's captured audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRef {
    /// Participant the audio belongs to
    pub participant_id: String,

    /// Path to the captured file
    pub path: PathBuf,

    /// Captured size in bytes (zero for a participant who never spoke)
    pub size_bytes: u64,
}

/// A decision returned by the extraction collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDecision {
    /// The decision text
    pub text: String,

    /// Participant the extractor attributed it to
    pub speaker_id: String,
}

/// Failure of a pipeline stage call.
///
/// Transient failures (network, 5xx) are retried; terminal failures
/// (rejected input, explicit business failure) are not.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("terminal failure: {0}")]
    Terminal(String),
}

impl StageError {
    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }
}

/// Failure to deliver a prompt to a participant
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The participant cannot be messaged directly (closed DMs)
    #[error("delivery denied for participant {0}")]
    Denied(String),

    #[error("delivery failed: {0}")]
    Other(String),
}

/// Per-speaker audio capture owned by a session
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Begin (or resume) capturing a participant's audio
    async fn start_capture(&self, session_id: Uuid, participant_id: &str) -> Result<()>;

    /// Stop capturing one participant; returns the captured audio, or
    /// None if capture was never started
    async fn stop_capture(
        &self,
        session_id: Uuid,
        participant_id: &str,
    ) -> Result<Option<AudioRef>>;

    /// Stop every capture for a session and collect the results
    async fn stop_all(&self, session_id: Uuid) -> Result<HashMap<String, AudioRef>>;

    /// Delete everything captured for a session
    async fn discard(&self, session_id: Uuid) -> Result<()>;
}

/// Remote transcription service
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe one file per participant into ordered segments
    async fn transcribe(
        &self,
        refs: &HashMap<String, AudioRef>,
    ) -> Result<Vec<TranscriptSegment>, StageError>;
}

/// Remote decision-extraction service
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Extract candidate decisions from combined transcript text
    async fn extract(&self, combined: &str) -> Result<Vec<ExtractedDecision>, StageError>;
}

/// Direct and channel message delivery with a cancel affordance.
///
/// Both calls return the prompt id the messaging layer attached the
/// cancel reaction to; cancel signals reference that id.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a direct message to one participant
    async fn send_direct(
        &self,
        participant_id: &str,
        content: &str,
    ) -> Result<String, DeliveryError>;

    /// Post to a shared channel (also the delivery fallback, mentioning
    /// the participant in `content`)
    async fn send_channel(&self, channel: &str, content: &str) -> Result<String, DeliveryError>;
}

/// Publication of session results
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Post confirmed decisions plus one cancellation notice per vetoed
    /// candidate
    async fn publish(
        &self,
        confirmed: &[DecisionCandidate],
        canceled: &[DecisionCandidate],
        summary: &str,
    ) -> Result<()>;

    /// Post the "no decisions detected" notice
    async fn publish_no_decision(&self, summary: &str) -> Result<()>;

    /// Flag the session for manual follow-up (zero-decision prompt vetoed)
    async fn publish_manual_review(&self, summary: &str) -> Result<()>;

    /// Report a failed session on the reporting channel
    async fn publish_error(&self, session_id: Uuid, detail: &str) -> Result<()>;
}
