//! Presence tracking: raw join/leave/move events in, session
//! start/join/end signals out.
//!
//! The tracker owns per-channel occupancy counts and the capture
//! start/stop side effects. Session state itself lives in the registry;
//! the tracker only holds what it needs to deduplicate starts and
//! detect the last leave.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::AudioCapture;
use crate::domain::{PresenceEvent, SessionState};

use super::registry::{SessionRegistry, SharedSession};

/// Signal emitted by the tracker toward the dispatcher
#[derive(Clone)]
pub enum SessionSignal {
    /// First human joined an empty channel; a session was created
    Start {
        channel: String,
        session: SharedSession,
        participant: String,
    },

    /// A new participant joined a session that is still recording
    Joined {
        channel: String,
        session_id: Uuid,
        participant: String,
    },

    /// Last human left; the session should be finalized
    End { channel: String, session_id: Uuid },
}

/// Converts presence events into session lifecycle signals
pub struct MembershipTracker {
    registry: Arc<SessionRegistry>,
    capture: Arc<dyn AudioCapture>,

    /// Current human occupants per channel
    occupancy: Mutex<HashMap<String, HashSet<String>>>,
}

impl MembershipTracker {
    pub fn new(registry: Arc<SessionRegistry>, capture: Arc<dyn AudioCapture>) -> Self {
        Self {
            registry,
            capture,
            occupancy: Mutex::new(HashMap::new()),
        }
    }

    /// Process one presence event.
    ///
    /// A move (both locations set and different) is a leave from the old
    /// channel followed by a join to the new one, handled in that order
    /// within this single call so no signal is lost or duplicated.
    pub async fn handle_presence(&self, event: &PresenceEvent) -> Result<Vec<SessionSignal>> {
        if !event.is_human {
            debug!(participant = %event.participant_id, "Ignoring non-human presence event");
            return Ok(Vec::new());
        }

        let mut signals = Vec::new();

        if let Some(old) = &event.previous {
            if event.new.as_deref() != Some(old.as_str()) {
                if let Some(signal) = self.handle_leave(old, &event.participant_id).await? {
                    signals.push(signal);
                }
            }
        }

        if let Some(new) = &event.new {
            if event.previous.as_deref() != Some(new.as_str()) {
                if let Some(signal) = self.handle_join(new, &event.participant_id).await? {
                    signals.push(signal);
                }
            }
        }

        Ok(signals)
    }

    async fn handle_join(
        &self,
        channel: &str,
        participant_id: &str,
    ) -> Result<Option<SessionSignal>> {
        {
            let mut occupancy = self.occupancy.lock().expect("occupancy lock poisoned");
            occupancy
                .entry(channel.to_string())
                .or_default()
                .insert(participant_id.to_string());
        }

        if let Some(session) = self.registry.get(channel) {
            return self.join_active(channel, participant_id, session).await;
        }

        let session = match self.registry.create_if_absent(channel) {
            Ok(session) => session,
            Err(e) => {
                // Lost a create race; treat as a plain join
                warn!(channel, error = %e, "Session appeared concurrently, joining it");
                match self.registry.get(channel) {
                    Some(session) => {
                        return self.join_active(channel, participant_id, session).await
                    }
                    None => return Ok(None),
                }
            }
        };

        let session_id = {
            let mut locked = session.lock().await;
            locked.add_participant(participant_id);
            locked.id
        };
        self.capture.start_capture(session_id, participant_id).await?;

        info!(channel, session_id = %session_id, participant = participant_id, "Session started");
        Ok(Some(SessionSignal::Start {
            channel: channel.to_string(),
            session,
            participant: participant_id.to_string(),
        }))
    }

    /// Attach a participant to an already-registered session. Only a
    /// session still recording accepts new arrivals; one mid-finalize
    /// would fold the fresh capture into its own cleanup.
    async fn join_active(
        &self,
        channel: &str,
        participant_id: &str,
        session: SharedSession,
    ) -> Result<Option<SessionSignal>> {
        let (session_id, newly_added) = {
            let mut session = session.lock().await;
            if session.state != SessionState::Recording {
                warn!(
                    channel,
                    participant = participant_id,
                    state = ?session.state,
                    "Join while session is finalizing, dropped"
                );
                return Ok(None);
            }
            (session.id, session.add_participant(participant_id))
        };
        self.capture.start_capture(session_id, participant_id).await?;

        // A rejoin resumes capture without a new signal
        if newly_added {
            Ok(Some(SessionSignal::Joined {
                channel: channel.to_string(),
                session_id,
                participant: participant_id.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    async fn handle_leave(
        &self,
        channel: &str,
        participant_id: &str,
    ) -> Result<Option<SessionSignal>> {
        let now_empty = {
            let mut occupancy = self.occupancy.lock().expect("occupancy lock poisoned");
            let occupants = occupancy.entry(channel.to_string()).or_default();
            occupants.remove(participant_id);
            if occupants.is_empty() {
                occupancy.remove(channel);
                true
            } else {
                false
            }
        };

        let Some(session_id) = self.registry.session_id(channel) else {
            return Ok(None);
        };

        // Stop this participant's capture; the historical participant set
        // on the session is untouched.
        self.capture.stop_capture(session_id, participant_id).await?;

        if now_empty {
            info!(channel, session_id = %session_id, "Last participant left");
            return Ok(Some(SessionSignal::End {
                channel: channel.to_string(),
                session_id,
            }));
        }

        Ok(None)
    }
}
