//! Routes external events to the session that owns them.
//!
//! One dispatcher per process. Presence events flow through the
//! membership tracker; an end-of-session signal spawns the owning
//! orchestrator's finalize task; cancel signals fan out to every active
//! veto window; an abort cancels exactly one session's token.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{CancelSignal, ExternalEvent, SessionEvent, SessionEventKind};

use super::membership::{MembershipTracker, SessionSignal};
use super::orchestrator::{Collaborators, SessionOrchestrator};
use super::registry::SessionRegistry;
use super::retry::RetryPolicy;
use super::session_log::SessionLog;

/// Veto-signal channel depth per session. Reactions arriving faster
/// than the coordinator drains them just wait their turn.
const CANCEL_CHANNEL_CAPACITY: usize = 64;

struct SessionHandle {
    session_id: Uuid,
    token: CancellationToken,
    cancel_tx: mpsc::Sender<CancelSignal>,
    cancel_rx: Option<mpsc::Receiver<CancelSignal>>,
    finalizing: bool,
}

/// Routes presence, cancel, and abort events to their sessions
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    tracker: MembershipTracker,
    collaborators: Collaborators,
    retry: RetryPolicy,
    veto_window: Duration,
    sessions_dir: PathBuf,
    active: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        collaborators: Collaborators,
        retry: RetryPolicy,
        veto_window: Duration,
        sessions_dir: PathBuf,
    ) -> Self {
        let tracker = MembershipTracker::new(
            Arc::clone(&registry),
            Arc::clone(&collaborators.capture),
        );

        Self {
            registry,
            tracker,
            collaborators,
            retry,
            veto_window,
            sessions_dir,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Parse and route one line of the inbound event feed
    pub async fn handle_line(&self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let event: ExternalEvent =
            serde_json::from_str(line).with_context(|| format!("Failed to parse event: {}", line))?;
        self.handle_event(event).await
    }

    /// Route one external event
    pub async fn handle_event(&self, event: ExternalEvent) -> Result<()> {
        match event {
            ExternalEvent::Presence(presence) => {
                let signals = self.tracker.handle_presence(&presence).await?;
                for signal in signals {
                    match signal {
                        SessionSignal::Start {
                            channel,
                            session,
                            participant,
                        } => {
                            let session_id = session.lock().await.id;
                            self.register(channel.clone(), session_id);
                            self.append_event(
                                session_id,
                                SessionEventKind::Started,
                                &format!("#{}", channel),
                            )
                            .await;
                            self.append_event(
                                session_id,
                                SessionEventKind::ParticipantJoined,
                                &participant,
                            )
                            .await;
                        }
                        SessionSignal::Joined {
                            session_id,
                            participant,
                            ..
                        } => {
                            self.append_event(
                                session_id,
                                SessionEventKind::ParticipantJoined,
                                &participant,
                            )
                            .await;
                        }
                        SessionSignal::End { channel, .. } => {
                            self.spawn_finalize(&channel);
                        }
                    }
                }
                Ok(())
            }
            ExternalEvent::Cancel(signal) => {
                self.broadcast_cancel(signal).await;
                Ok(())
            }
            ExternalEvent::Abort { channel } => {
                self.abort(&channel);
                Ok(())
            }
        }
    }

    fn register(&self, channel: String, session_id: Uuid) {
        let (cancel_tx, cancel_rx) = mpsc::channel(CANCEL_CHANNEL_CAPACITY);
        let handle = SessionHandle {
            session_id,
            token: CancellationToken::new(),
            cancel_tx,
            cancel_rx: Some(cancel_rx),
            finalizing: false,
        };

        let mut active = self.active.lock().expect("dispatcher lock poisoned");
        active.insert(channel, handle);
    }

    /// Cancel signals are broadcast: prompt ids are globally unique, so
    /// every session but the owner drops the signal as unknown.
    async fn broadcast_cancel(&self, signal: CancelSignal) {
        let senders: Vec<mpsc::Sender<CancelSignal>> = {
            let active = self.active.lock().expect("dispatcher lock poisoned");
            active.values().map(|h| h.cancel_tx.clone()).collect()
        };

        for sender in senders {
            // A session not currently in its veto window has no receiver
            // draining; a full or closed channel is not an error.
            let _ = sender.try_send(signal.clone());
        }
    }

    /// Abort one channel's session. Whatever stage is suspended observes
    /// the token and abandons its work; other sessions are unaffected.
    fn abort(&self, channel: &str) {
        let should_finalize = {
            let active = self.active.lock().expect("dispatcher lock poisoned");
            match active.get(channel) {
                Some(handle) => {
                    info!(channel, session_id = %handle.session_id, "Aborting session");
                    handle.token.cancel();
                    !handle.finalizing
                }
                None => {
                    warn!(channel, "Abort for channel with no active session, ignoring");
                    false
                }
            }
        };

        // A session still recording has no finalize task yet; spawn one
        // so the cancelled path runs cleanup.
        if should_finalize {
            self.spawn_finalize(channel);
        }
    }

    fn spawn_finalize(&self, channel: &str) {
        let (session_id, token, cancel_rx) = {
            let mut active = self.active.lock().expect("dispatcher lock poisoned");
            let Some(handle) = active.get_mut(channel) else {
                warn!(channel, "Finalize requested for unknown channel");
                return;
            };
            if handle.finalizing {
                return;
            }
            handle.finalizing = true;
            (
                handle.session_id,
                handle.token.clone(),
                handle.cancel_rx.take(),
            )
        };

        let Some(cancel_rx) = cancel_rx else {
            warn!(channel, "Finalize receiver already taken");
            return;
        };
        let Some(session) = self.registry.get(channel) else {
            warn!(channel, "Finalize requested but registry has no session");
            return;
        };

        let orchestrator = SessionOrchestrator::new(
            session,
            Arc::clone(&self.registry),
            self.collaborators.clone(),
            self.retry.clone(),
            self.veto_window,
            self.sessions_dir.clone(),
            token,
        );

        let active = Arc::clone(&self.active);
        let channel = channel.to_string();
        tokio::spawn(async move {
            orchestrator.finalize(cancel_rx).await;

            let mut active = active.lock().expect("dispatcher lock poisoned");
            if active
                .get(&channel)
                .map(|h| h.session_id == session_id)
                .unwrap_or(false)
            {
                active.remove(&channel);
            }
        });
    }

    /// Audit-log write; failure is logged and never fails event routing
    async fn append_event(&self, session_id: Uuid, kind: SessionEventKind, detail: &str) {
        match SessionLog::open(&self.sessions_dir, session_id).await {
            Ok(log) => {
                if let Err(e) = log.append(&SessionEvent::new(session_id, kind, detail)).await {
                    warn!(error = %e, "Failed to append session event");
                }
            }
            Err(e) => warn!(error = %e, "Session log unavailable"),
        }
    }

    /// Number of sessions currently routed (recording or finalizing)
    pub fn active_count(&self) -> usize {
        self.active.lock().expect("dispatcher lock poisoned").len()
    }
}
