//! Session record and lifecycle state machine.
//!
//! A Session covers one meeting from first join to publication. State
//! only moves forward; the only backward-looking exception is the jump
//! from any non-terminal state into Failed or Cancelled.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::candidate::DecisionCandidate;

/// One meeting's capture-to-publish lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session
    pub id: Uuid,

    /// Voice channel the session belongs to
    pub channel: String,

    /// When the first participant joined
    pub started_at: DateTime<Utc>,

    /// When the last participant left (unset while recording)
    pub ended_at: Option<DateTime<Utc>>,

    /// Everyone who ever joined. Append-only; leaving does not remove.
    pub participants: BTreeSet<String>,

    /// Captured audio per participant, collected when recording stops
    pub audio_refs: HashMap<String, PathBuf>,

    /// Transcript fragments in combined-text order
    pub transcript: Vec<TranscriptSegment>,

    /// Decision candidates extracted from the transcript
    pub candidates: Vec<DecisionCandidate>,

    /// Current lifecycle state
    pub state: SessionState,
}

/// A fragment of transcribed speech attributed to one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Who spoke
    pub participant_id: String,

    /// What they said
    pub text: String,

    /// Character offset of this segment within the combined transcript
    pub start_offset: usize,

    /// One past the last character of this segment in the combined transcript
    pub end_offset: usize,
}

/// Lifecycle state of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SessionState {
    /// Participants present, audio being captured
    Recording,

    /// Transcription and extraction in flight
    Processing,

    /// Veto window open
    Confirming,

    /// Posting results
    Publishing,

    /// Published and cleaned up
    Completed,

    /// Pipeline or publication failed terminally
    Failed { error: String },

    /// Capture aborted externally; no output produced
    Cancelled,
}

impl SessionState {
    /// Whether no further transitions can occur
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed { .. } | SessionState::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            SessionState::Recording => 0,
            SessionState::Processing => 1,
            SessionState::Confirming => 2,
            SessionState::Publishing => 3,
            SessionState::Completed
            | SessionState::Failed { .. }
            | SessionState::Cancelled => 4,
        }
    }
}

/// Rejected session state transition
#[derive(Debug, Error)]
#[error("invalid session transition: {from:?} → {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl Session {
    /// Create a new session for a channel, starting in Recording
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            started_at: Utc::now(),
            ended_at: None,
            participants: BTreeSet::new(),
            audio_refs: HashMap::new(),
            transcript: Vec::new(),
            candidates: Vec::new(),
            state: SessionState::Recording,
        }
    }

    /// Add a participant. Idempotent; returns true on first insertion.
    pub fn add_participant(&mut self, participant_id: &str) -> bool {
        self.participants.insert(participant_id.to_string())
    }

    /// Advance the lifecycle state.
    ///
    /// Forward steps must be adjacent (Recording→Processing→Confirming→
    /// Publishing→Completed); Failed and Cancelled are reachable from any
    /// non-terminal state. Everything else is rejected.
    pub fn advance(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        let ok = if self.state.is_terminal() {
            false
        } else if matches!(next, SessionState::Failed { .. } | SessionState::Cancelled) {
            true
        } else {
            next.rank() == self.state.rank() + 1
        };

        if !ok {
            return Err(InvalidTransition {
                from: self.state.clone(),
                to: next,
            });
        }

        self.state = next;
        Ok(())
    }

    /// Combined transcript text, in segment order
    pub fn combined_transcript(&self) -> String {
        self.transcript
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One-line human summary for publication
    pub fn summary(&self) -> String {
        let ended = self
            .ended_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "ongoing".to_string());
        format!(
            "session {} in #{} ({} participants, {} → {})",
            self.id,
            self.channel,
            self.participants.len(),
            self.started_at.to_rfc3339(),
            ended
        )
    }
}
