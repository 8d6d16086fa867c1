//! Decision candidates and their confirmation status.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A proposed decision extracted from a session's transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionCandidate {
    /// Unique identifier for this candidate
    pub id: Uuid,

    /// The decision text as extracted
    pub text: String,

    /// Participant whose speech produced this candidate
    pub speaker_id: String,

    /// Confirmation status
    pub status: CandidateStatus,

    /// Prompt id sent to each participant during the veto window
    /// (participant id → prompt id)
    pub prompts: HashMap<String, String>,
}

/// Confirmation status of a candidate.
///
/// Transitions: Pending → Canceled, or Pending → Confirmed → Published.
/// A canceled candidate is never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Awaiting the veto window
    Pending,

    /// Survived the veto window
    Confirmed,

    /// Vetoed by a participant
    Canceled,

    /// Posted to the results channel
    Published,
}

impl DecisionCandidate {
    /// Create a pending candidate
    pub fn new(text: impl Into<String>, speaker_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            speaker_id: speaker_id.into(),
            status: CandidateStatus::Pending,
            prompts: HashMap::new(),
        }
    }

    /// Cancel this candidate. Idempotent: returns true only on the
    /// transition from Pending, false if already canceled or past the
    /// veto window.
    pub fn cancel(&mut self) -> bool {
        match self.status {
            CandidateStatus::Pending => {
                self.status = CandidateStatus::Canceled;
                true
            }
            _ => false,
        }
    }

    /// Confirm a pending candidate (veto window elapsed with no veto)
    pub fn confirm(&mut self) -> bool {
        match self.status {
            CandidateStatus::Pending => {
                self.status = CandidateStatus::Confirmed;
                true
            }
            _ => false,
        }
    }

    /// Mark a confirmed candidate as published
    pub fn mark_published(&mut self) -> bool {
        match self.status {
            CandidateStatus::Confirmed => {
                self.status = CandidateStatus::Published;
                true
            }
            _ => false,
        }
    }
}
