//! Per-session state machine from recording to a terminal state.
//!
//! One orchestrator instance owns one session. It sequences the
//! pipeline stages, runs the veto window, publishes results, and
//! guarantees cleanup exactly once on every terminal path. No error
//! escapes the top-level finalize loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    AudioCapture, ExtractionBackend, Messenger, Publisher, TranscriptionBackend,
};
use crate::domain::{
    CancelSignal, CandidateStatus, DecisionCandidate, SessionEvent, SessionEventKind,
    SessionState,
};

use super::pipeline::{ExtractionStage, TranscriptionStage};
use super::registry::{SessionRegistry, SharedSession};
use super::retry::RetryPolicy;
use super::session_log::SessionLog;
use super::veto::{VetoCoordinator, VetoOutcome};

/// The external collaborators a session needs
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn AudioCapture>,
    pub transcription: Arc<dyn TranscriptionBackend>,
    pub extraction: Arc<dyn ExtractionBackend>,
    pub messenger: Arc<dyn Messenger>,
    pub publisher: Arc<dyn Publisher>,
}

/// How a finalized session ended
enum FinalOutcome {
    Completed,
    Failed(anyhow::Error),
    Cancelled,
}

/// Drives one session from Recording to a terminal state
pub struct SessionOrchestrator {
    session: SharedSession,
    registry: Arc<SessionRegistry>,
    collaborators: Collaborators,
    retry: RetryPolicy,
    veto_window: Duration,
    sessions_dir: PathBuf,
    token: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(
        session: SharedSession,
        registry: Arc<SessionRegistry>,
        collaborators: Collaborators,
        retry: RetryPolicy,
        veto_window: Duration,
        sessions_dir: PathBuf,
        token: CancellationToken,
    ) -> Self {
        Self {
            session,
            registry,
            collaborators,
            retry,
            veto_window,
            sessions_dir,
            token,
        }
    }

    /// Drive the session to a terminal state and clean up.
    ///
    /// Called when the last participant leaves. External cancellation is
    /// observed at every suspension point: the staged work runs under a
    /// select against the session token, so whatever stage is in flight
    /// is dropped promptly, including any outstanding veto timers.
    pub async fn finalize(self, cancel_rx: mpsc::Receiver<CancelSignal>) {
        let (session_id, channel) = {
            let session = self.session.lock().await;
            (session.id, session.channel.clone())
        };

        self.finalize_inner(session_id, &channel, cancel_rx).await;
    }

    #[instrument(skip_all, fields(session_id = %session_id, channel = channel))]
    async fn finalize_inner(
        &self,
        session_id: Uuid,
        channel: &str,
        mut cancel_rx: mpsc::Receiver<CancelSignal>,
    ) {
        info!("Finalizing session");

        let log = match SessionLog::open(&self.sessions_dir, session_id).await {
            Ok(log) => Some(log),
            Err(e) => {
                warn!(error = %e, "Session log unavailable, continuing without audit trail");
                None
            }
        };

        let outcome = tokio::select! {
            _ = self.token.cancelled() => FinalOutcome::Cancelled,
            result = self.run_stages(session_id, channel, &mut cancel_rx, log.as_ref()) => {
                match result {
                    Ok(()) => FinalOutcome::Completed,
                    Err(e) => FinalOutcome::Failed(e),
                }
            }
        };

        match outcome {
            FinalOutcome::Completed => {
                let mut session = self.session.lock().await;
                if let Err(e) = session.advance(SessionState::Completed) {
                    warn!(error = %e, "Completed transition rejected");
                }
                info!("Session completed");
            }
            FinalOutcome::Failed(e) => {
                error!(error = %e, "Session failed");
                {
                    let mut session = self.session.lock().await;
                    let _ = session.advance(SessionState::Failed {
                        error: e.to_string(),
                    });
                }
                self.log_event(log.as_ref(), session_id, SessionEventKind::Failed, &e.to_string())
                    .await;
                // A failed session is never silent
                if let Err(report_err) = self
                    .collaborators
                    .publisher
                    .publish_error(session_id, &e.to_string())
                    .await
                {
                    error!(error = %report_err, "Failed to report session error");
                }
            }
            FinalOutcome::Cancelled => {
                info!("Session cancelled externally, skipping remaining stages");
                {
                    let mut session = self.session.lock().await;
                    let _ = session.advance(SessionState::Cancelled);
                }
                self.log_event(log.as_ref(), session_id, SessionEventKind::Cancelled, "external abort")
                    .await;
                // No participant-facing output on cancellation
            }
        }

        self.cleanup(session_id, channel).await;
    }

    /// Recording → Processing → Confirming → Publishing, in strict order
    async fn run_stages(
        &self,
        session_id: Uuid,
        channel: &str,
        cancel_rx: &mut mpsc::Receiver<CancelSignal>,
        log: Option<&SessionLog>,
    ) -> Result<()> {
        // --- Recording → Processing ---
        {
            let mut session = self.session.lock().await;
            session.ended_at = Some(Utc::now());
            session
                .advance(SessionState::Processing)
                .context("entering processing")?;
        }
        self.log_event(log, session_id, SessionEventKind::ProcessingStarted, "recording stopped")
            .await;

        let audio_refs = self
            .collaborators
            .capture
            .stop_all(session_id)
            .await
            .context("stopping audio capture")?;

        // Zero-byte captures stay on the session record but are excluded
        // from the transcription input.
        let transcription_input: std::collections::HashMap<_, _> = audio_refs
            .iter()
            .filter(|(_, audio)| audio.size_bytes > 0)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        {
            let mut session = self.session.lock().await;
            session.audio_refs = audio_refs
                .iter()
                .map(|(k, v)| (k.clone(), v.path.clone()))
                .collect();
        }

        // --- Processing: transcription, then extraction ---
        let transcription =
            TranscriptionStage::new(Arc::clone(&self.collaborators.transcription), self.retry.clone());
        let transcript = transcription
            .run(&transcription_input)
            .await
            .context("transcription stage")?;

        let extraction =
            ExtractionStage::new(Arc::clone(&self.collaborators.extraction), self.retry.clone());
        let candidates = extraction.run(&transcript).await.context("extraction stage")?;

        for candidate in &candidates {
            self.log_event(
                log,
                session_id,
                SessionEventKind::CandidateExtracted,
                &format!("{} (by {})", candidate.text, candidate.speaker_id),
            )
            .await;
        }

        let participants = {
            let mut session = self.session.lock().await;
            session.transcript = transcript;
            session.candidates = candidates.clone();
            session
                .advance(SessionState::Confirming)
                .context("entering confirming")?;
            session.participants.clone()
        };

        // --- Confirming: the veto window ---
        let coordinator =
            VetoCoordinator::new(Arc::clone(&self.collaborators.messenger), self.veto_window);
        let outcome = coordinator
            .run(session_id, channel, &participants, candidates, cancel_rx)
            .await
            .context("veto window")?;

        {
            let mut session = self.session.lock().await;
            session
                .advance(SessionState::Publishing)
                .context("entering publishing")?;
        }

        // --- Publishing ---
        self.publish(session_id, outcome, log).await
    }

    async fn publish(
        &self,
        session_id: Uuid,
        outcome: VetoOutcome,
        log: Option<&SessionLog>,
    ) -> Result<()> {
        let summary = self.session.lock().await.summary();

        match outcome {
            VetoOutcome::ManualReview => {
                self.collaborators
                    .publisher
                    .publish_manual_review(&summary)
                    .await
                    .context("publishing manual-review notice")?;
                self.log_event(
                    log,
                    session_id,
                    SessionEventKind::ManualReviewFlagged,
                    "zero-decision prompt vetoed",
                )
                .await;
            }
            VetoOutcome::Resolved {
                mut confirmed,
                canceled,
            } => {
                for candidate in &canceled {
                    self.log_event(
                        log,
                        session_id,
                        SessionEventKind::CandidateCanceled,
                        &candidate.text,
                    )
                    .await;
                }

                if confirmed.is_empty() && canceled.is_empty() {
                    self.collaborators
                        .publisher
                        .publish_no_decision(&summary)
                        .await
                        .context("publishing no-decision notice")?;
                } else {
                    for candidate in &mut confirmed {
                        candidate.mark_published();
                    }
                    self.collaborators
                        .publisher
                        .publish(&confirmed, &canceled, &summary)
                        .await
                        .context("publishing decisions")?;
                }

                self.log_event(
                    log,
                    session_id,
                    SessionEventKind::Published,
                    &format!("{} confirmed, {} canceled", confirmed.len(), canceled.len()),
                )
                .await;

                let mut session = self.session.lock().await;
                session.candidates = merge_final(confirmed, canceled);
            }
        }

        Ok(())
    }

    /// Audio deletion plus registry eviction. Runs exactly once per
    /// session, on every terminal path.
    async fn cleanup(&self, session_id: Uuid, channel: &str) {
        if let Err(e) = self.collaborators.capture.discard(session_id).await {
            warn!(error = %e, "Audio cleanup failed");
        }
        self.registry.remove(channel, session_id);
        info!("Session cleaned up");
    }

    /// Audit-log write; failure is logged and never fails the session
    async fn log_event(
        &self,
        log: Option<&SessionLog>,
        session_id: Uuid,
        kind: SessionEventKind,
        detail: &str,
    ) {
        if let Some(log) = log {
            let event = SessionEvent::new(session_id, kind, detail);
            if let Err(e) = log.append(&event).await {
                warn!(error = %e, "Failed to append session event");
            }
        }
    }
}

fn merge_final(
    confirmed: Vec<DecisionCandidate>,
    canceled: Vec<DecisionCandidate>,
) -> Vec<DecisionCandidate> {
    let mut all = confirmed;
    all.extend(canceled);
    debug_assert!(all
        .iter()
        .all(|c| c.status != CandidateStatus::Pending));
    all
}
