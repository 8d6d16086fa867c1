//! External events consumed by the dispatcher and the per-session
//! audit-log entries written by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A presence change from the voice transport.
///
/// `previous`/`new` are channel names; `None` means "not in any channel".
/// A move shows up as both being set and different.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    /// Who moved
    pub participant_id: String,

    /// False for bots and other non-human actors
    pub is_human: bool,

    /// Channel the participant was in before this event
    pub previous: Option<String>,

    /// Channel the participant is in after this event
    pub new: Option<String>,
}

/// A reaction-based veto signal from the messaging layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSignal {
    /// Prompt the reaction was attached to
    pub prompt_id: String,

    /// Participant who reacted
    pub participant_id: String,
}

/// Wire format of the dispatcher's inbound event feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ExternalEvent {
    /// Participant joined/left/moved between voice channels
    Presence(PresenceEvent),

    /// Participant vetoed a prompt
    Cancel(CancelSignal),

    /// Capture for a channel was aborted externally (e.g. bot removed)
    Abort { channel: String },
}

/// A single entry in a session's append-only log.
///
/// The log is an audit trail: a session summary can be reconstructed by
/// replaying its entries in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Unique identifier for this entry
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The session this event belongs to
    pub session_id: Uuid,

    /// What happened
    pub kind: SessionEventKind,

    /// Human-readable summary (no prompt contents, no transcripts)
    pub detail: String,
}

/// Types of events recorded in the session log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// Session created on first join
    Started,

    /// A participant joined the channel
    ParticipantJoined,

    /// Recording stopped, pipeline started
    ProcessingStarted,

    /// A decision candidate was extracted
    CandidateExtracted,

    /// A candidate was vetoed during the confirmation window
    CandidateCanceled,

    /// Results were posted
    Published,

    /// Zero-decision prompt was vetoed; session flagged for follow-up
    ManualReviewFlagged,

    /// Pipeline or publication failed terminally
    Failed,

    /// Capture was aborted externally
    Cancelled,
}

impl SessionEvent {
    /// Create a new entry with the current timestamp
    pub fn new(session_id: Uuid, kind: SessionEventKind, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id,
            kind,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_event_wire_format() {
        let line = r#"{"type":"presence","participant_id":"alice","is_human":true,"previous":null,"new":"standup"}"#;
        let event: ExternalEvent = serde_json::from_str(line).unwrap();
        match event {
            ExternalEvent::Presence(p) => {
                assert_eq!(p.participant_id, "alice");
                assert_eq!(p.new.as_deref(), Some("standup"));
                assert!(p.previous.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_event_wire_format() {
        let line = r#"{"type":"cancel","prompt_id":"p-1","participant_id":"bob"}"#;
        let event: ExternalEvent = serde_json::from_str(line).unwrap();
        assert!(matches!(event, ExternalEvent::Cancel(_)));
    }

    #[test]
    fn test_session_event_roundtrip() {
        let event = SessionEvent::new(Uuid::new_v4(), SessionEventKind::Started, "first join");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, SessionEventKind::Started);
    }
}
