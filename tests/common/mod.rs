//! Mock collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use quorum::adapters::{
    AudioCapture, AudioRef, DeliveryError, ExtractedDecision, ExtractionBackend, Messenger,
    Publisher, StageError, TranscriptionBackend,
};
use quorum::domain::{DecisionCandidate, TranscriptSegment};

/// Capture store with preconfigured stop_all output
#[derive(Default)]
pub struct MockCapture {
    pub refs: Mutex<HashMap<String, AudioRef>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub discards: AtomicUsize,
}

impl MockCapture {
    pub fn with_refs(refs: HashMap<String, AudioRef>) -> Self {
        Self {
            refs: Mutex::new(refs),
            ..Default::default()
        }
    }

    pub fn discard_count(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioCapture for MockCapture {
    async fn start_capture(&self, _session_id: Uuid, participant_id: &str) -> Result<()> {
        self.started.lock().unwrap().push(participant_id.to_string());
        Ok(())
    }

    async fn stop_capture(
        &self,
        _session_id: Uuid,
        participant_id: &str,
    ) -> Result<Option<AudioRef>> {
        self.stopped.lock().unwrap().push(participant_id.to_string());
        Ok(self.refs.lock().unwrap().get(participant_id).cloned())
    }

    async fn stop_all(&self, _session_id: Uuid) -> Result<HashMap<String, AudioRef>> {
        Ok(self.refs.lock().unwrap().clone())
    }

    async fn discard(&self, _session_id: Uuid) -> Result<()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transcription backend that either succeeds with fixed segments or
/// always fails
pub struct MockTranscription {
    pub segments: Vec<TranscriptSegment>,
    /// None = succeed; Some(true) = transient failure; Some(false) = terminal
    pub fail: Option<bool>,
    pub calls: AtomicUsize,
}

impl MockTranscription {
    pub fn ok(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            segments,
            fail: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(transient: bool) -> Self {
        Self {
            segments: Vec::new(),
            fail: Some(transient),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranscriptionBackend for MockTranscription {
    async fn transcribe(
        &self,
        _refs: &HashMap<String, AudioRef>,
    ) -> Result<Vec<TranscriptSegment>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail {
            Some(true) => Err(StageError::Transient("service unavailable".to_string())),
            Some(false) => Err(StageError::Terminal("rejected".to_string())),
            None => Ok(self.segments.clone()),
        }
    }
}

/// Extraction backend counterpart
pub struct MockExtraction {
    pub decisions: Vec<ExtractedDecision>,
    pub fail: Option<bool>,
    pub calls: AtomicUsize,
}

impl MockExtraction {
    pub fn ok(decisions: Vec<ExtractedDecision>) -> Self {
        Self {
            decisions,
            fail: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(transient: bool) -> Self {
        Self {
            decisions: Vec::new(),
            fail: Some(transient),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExtractionBackend for MockExtraction {
    async fn extract(&self, _combined: &str) -> Result<Vec<ExtractedDecision>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail {
            Some(true) => Err(StageError::Transient("service unavailable".to_string())),
            Some(false) => Err(StageError::Terminal("rejected".to_string())),
            None => Ok(self.decisions.clone()),
        }
    }
}

/// One delivered prompt
#[derive(Debug, Clone)]
pub struct SentPrompt {
    pub prompt_id: String,
    /// Direct recipient, or None for a channel post
    pub participant: Option<String>,
    pub channel: Option<String>,
    pub content: String,
}

/// Messenger issuing deterministic prompt ids ("p-0", "p-1", ...)
#[derive(Default)]
pub struct MockMessenger {
    next: AtomicUsize,
    /// Participants whose DMs are closed
    pub denied: HashSet<String>,
    /// Per-participant direct-delivery latency
    pub delays: HashMap<String, Duration>,
    pub sent: Mutex<Vec<SentPrompt>>,
}

impl MockMessenger {
    pub fn denying(participants: &[&str]) -> Self {
        Self {
            denied: participants.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn delaying(participant: &str, delay: Duration) -> Self {
        let mut delays = HashMap::new();
        delays.insert(participant.to_string(), delay);
        Self {
            delays,
            ..Default::default()
        }
    }

    pub fn sent_prompts(&self) -> Vec<SentPrompt> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send_direct(
        &self,
        participant_id: &str,
        content: &str,
    ) -> Result<String, DeliveryError> {
        if let Some(delay) = self.delays.get(participant_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.denied.contains(participant_id) {
            return Err(DeliveryError::Denied(participant_id.to_string()));
        }
        let prompt_id = format!("p-{}", self.next.fetch_add(1, Ordering::SeqCst));
        self.sent.lock().unwrap().push(SentPrompt {
            prompt_id: prompt_id.clone(),
            participant: Some(participant_id.to_string()),
            channel: None,
            content: content.to_string(),
        });
        Ok(prompt_id)
    }

    async fn send_channel(&self, channel: &str, content: &str) -> Result<String, DeliveryError> {
        let prompt_id = format!("p-{}", self.next.fetch_add(1, Ordering::SeqCst));
        self.sent.lock().unwrap().push(SentPrompt {
            prompt_id: prompt_id.clone(),
            participant: None,
            channel: Some(channel.to_string()),
            content: content.to_string(),
        });
        Ok(prompt_id)
    }
}

/// Publisher that records everything it is asked to post
#[derive(Default)]
pub struct MockPublisher {
    pub published: Mutex<Vec<(Vec<DecisionCandidate>, Vec<DecisionCandidate>)>>,
    pub no_decision: AtomicUsize,
    pub manual_review: AtomicUsize,
    pub errors: Mutex<Vec<String>>,
}

impl MockPublisher {
    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(
        &self,
        confirmed: &[DecisionCandidate],
        canceled: &[DecisionCandidate],
        _summary: &str,
    ) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((confirmed.to_vec(), canceled.to_vec()));
        Ok(())
    }

    async fn publish_no_decision(&self, _summary: &str) -> Result<()> {
        self.no_decision.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_manual_review(&self, _summary: &str) -> Result<()> {
        self.manual_review.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_error(&self, _session_id: Uuid, detail: &str) -> Result<()> {
        self.errors.lock().unwrap().push(detail.to_string());
        Ok(())
    }
}

/// Transcript segment helper with offsets left for the stage to rebase
pub fn segment(participant: &str, text: &str) -> TranscriptSegment {
    TranscriptSegment {
        participant_id: participant.to_string(),
        text: text.to_string(),
        start_offset: 0,
        end_offset: 0,
    }
}

/// Audio ref helper pointing at a path that may or may not exist
pub fn audio_ref(participant: &str, path: &str, size_bytes: u64) -> AudioRef {
    AudioRef {
        participant_id: participant.to_string(),
        path: path.into(),
        size_bytes,
    }
}
