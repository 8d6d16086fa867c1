//! The per-decision confirmation protocol.
//!
//! Every (candidate, participant) pair gets one prompt with a cancel
//! affordance and one independent timer. Delivery and timing both run
//! per-pair against a single absolute deadline, so one participant's
//! slow or hung delivery never extends anyone else's window or the
//! coordinator's resolution. A veto on any prompt cancels the candidate
//! for everyone; a veto after the prompt's window elapsed is a no-op.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{DeliveryError, Messenger};
use crate::domain::{CancelSignal, CandidateStatus, DecisionCandidate};

/// Result of a veto window
#[derive(Debug)]
pub enum VetoOutcome {
    /// Window elapsed for every candidate; survivors are confirmed
    Resolved {
        confirmed: Vec<DecisionCandidate>,
        canceled: Vec<DecisionCandidate>,
    },

    /// The zero-decision prompt was vetoed: a participant says a
    /// decision was made that the pipeline missed
    ManualReview,
}

/// (candidate index, participant, prompt id) reported by a delivery
type PromptRegistration = (usize, String, String);

/// Runs the confirmation window for one session's candidate set
pub struct VetoCoordinator {
    messenger: Arc<dyn Messenger>,
    veto_window: Duration,
}

impl VetoCoordinator {
    pub fn new(messenger: Arc<dyn Messenger>, veto_window: Duration) -> Self {
        Self {
            messenger,
            veto_window,
        }
    }

    /// Run the protocol to completion.
    ///
    /// Cancellation of the whole session is handled by the caller
    /// dropping this future; the per-pair tasks live in a JoinSet owned
    /// here, so dropping releases every outstanding delivery and timer.
    #[instrument(skip_all, fields(session_id = %session_id, channel = channel, candidates = candidates.len()))]
    pub async fn run(
        &self,
        session_id: Uuid,
        channel: &str,
        participants: &BTreeSet<String>,
        mut candidates: Vec<DecisionCandidate>,
        cancel_rx: &mut mpsc::Receiver<CancelSignal>,
    ) -> Result<VetoOutcome> {
        if candidates.is_empty() {
            return self
                .run_zero_decision(session_id, channel, participants, cancel_rx)
                .await;
        }

        let deadline = Instant::now() + self.veto_window;
        let root = CancellationToken::new();
        let candidate_tokens: Vec<CancellationToken> =
            candidates.iter().map(|_| root.child_token()).collect();

        // Each pair delivers its own prompt, reports the prompt id for
        // cancel routing, then waits out the shared deadline. A delivery
        // that has not finished by the deadline is abandoned.
        let capacity = (candidates.len() * participants.len()).max(1);
        let (reg_tx, mut reg_rx) = mpsc::channel::<PromptRegistration>(capacity);
        let mut timers: JoinSet<Option<String>> = JoinSet::new();

        for (idx, candidate) in candidates.iter().enumerate() {
            let content = format!(
                "Decision detected: \"{}\" (proposed by {}). React with ❌ within {}s to veto.",
                candidate.text,
                candidate.speaker_id,
                self.veto_window.as_secs()
            );

            for participant in participants {
                let messenger = Arc::clone(&self.messenger);
                let token = candidate_tokens[idx].clone();
                let reg_tx = reg_tx.clone();
                let channel = channel.to_string();
                let participant = participant.clone();
                let content = content.clone();

                timers.spawn(async move {
                    let delivered = tokio::select! {
                        _ = token.cancelled() => return None,
                        _ = tokio::time::sleep_until(deadline) => {
                            warn!(participant = %participant, "Prompt delivery did not finish within the veto window");
                            return None;
                        }
                        id = deliver(messenger.as_ref(), &channel, &participant, &content) => id,
                    };
                    let prompt_id = delivered?;
                    let _ = reg_tx.send((idx, participant, prompt_id.clone())).await;

                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = token.cancelled() => {}
                    }
                    Some(prompt_id)
                });
            }
        }
        drop(reg_tx);

        // Wait for every timer, applying cancel signals as they arrive.
        let mut pending: HashMap<String, usize> = HashMap::new();
        let mut elapsed: HashSet<String> = HashSet::new();
        // A reaction can race its prompt's delivery acknowledgment; hold
        // it until the prompt registers.
        let mut early: HashMap<String, CancelSignal> = HashMap::new();

        while !timers.is_empty() {
            tokio::select! {
                Some(joined) = timers.join_next() => {
                    if let Some(prompt_id) = joined.context("veto timer task panicked")? {
                        pending.remove(&prompt_id);
                        elapsed.insert(prompt_id);
                    }
                }
                Some((idx, participant, prompt_id)) = reg_rx.recv() => {
                    candidates[idx].prompts.insert(participant, prompt_id.clone());
                    if !elapsed.contains(&prompt_id) {
                        pending.insert(prompt_id.clone(), idx);
                        if let Some(signal) = early.remove(&prompt_id) {
                            Self::apply_cancel(
                                &signal,
                                &pending,
                                &elapsed,
                                &mut candidates,
                                &candidate_tokens,
                            );
                        }
                    }
                }
                Some(signal) = cancel_rx.recv() => {
                    if pending.contains_key(&signal.prompt_id) || elapsed.contains(&signal.prompt_id) {
                        Self::apply_cancel(
                            &signal,
                            &pending,
                            &elapsed,
                            &mut candidates,
                            &candidate_tokens,
                        );
                    } else {
                        debug!(prompt_id = %signal.prompt_id, "Veto ahead of prompt registration, holding");
                        early.insert(signal.prompt_id.clone(), signal);
                    }
                }
            }
        }

        // Late registrations only complete the routing record
        while let Ok((idx, participant, prompt_id)) = reg_rx.try_recv() {
            candidates[idx].prompts.insert(participant, prompt_id);
        }

        let mut confirmed = Vec::new();
        let mut canceled = Vec::new();
        for mut candidate in candidates {
            if candidate.status == CandidateStatus::Pending {
                candidate.confirm();
            }
            match candidate.status {
                CandidateStatus::Canceled => canceled.push(candidate),
                _ => confirmed.push(candidate),
            }
        }

        info!(
            confirmed = confirmed.len(),
            canceled = canceled.len(),
            "Veto window resolved"
        );
        Ok(VetoOutcome::Resolved {
            confirmed,
            canceled,
        })
    }

    /// Zero-candidate case: one "no decision detected" prompt per
    /// participant; any veto within the window flags manual follow-up.
    async fn run_zero_decision(
        &self,
        session_id: Uuid,
        channel: &str,
        participants: &BTreeSet<String>,
        cancel_rx: &mut mpsc::Receiver<CancelSignal>,
    ) -> Result<VetoOutcome> {
        let content = format!(
            "No decision was detected in this meeting. React with ❌ within {}s if one was actually made.",
            self.veto_window.as_secs()
        );

        let deadline = Instant::now() + self.veto_window;
        let mut deliveries: JoinSet<Option<String>> = JoinSet::new();
        for participant in participants {
            let messenger = Arc::clone(&self.messenger);
            let channel = channel.to_string();
            let participant = participant.clone();
            let content = content.clone();
            deliveries.spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => None,
                    id = deliver(messenger.as_ref(), &channel, &participant, &content) => id,
                }
            });
        }

        let window = tokio::time::sleep_until(deadline);
        tokio::pin!(window);

        let mut prompt_ids: HashSet<String> = HashSet::new();
        let mut early: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                _ = &mut window => {
                    info!(session_id = %session_id, "Zero-decision window elapsed with no veto");
                    return Ok(VetoOutcome::Resolved {
                        confirmed: Vec::new(),
                        canceled: Vec::new(),
                    });
                }
                Some(joined) = deliveries.join_next() => {
                    if let Some(id) = joined.context("prompt delivery task panicked")? {
                        if early.contains(&id) {
                            info!(session_id = %session_id, "Zero-decision prompt vetoed, flagging manual review");
                            return Ok(VetoOutcome::ManualReview);
                        }
                        prompt_ids.insert(id);
                    }
                }
                Some(signal) = cancel_rx.recv() => {
                    if prompt_ids.contains(&signal.prompt_id) {
                        info!(
                            session_id = %session_id,
                            participant = %signal.participant_id,
                            "Zero-decision prompt vetoed, flagging manual review"
                        );
                        return Ok(VetoOutcome::ManualReview);
                    }
                    debug!(prompt_id = %signal.prompt_id, "Veto ahead of prompt registration, holding");
                    early.insert(signal.prompt_id.clone());
                }
            }
        }
    }

    fn apply_cancel(
        signal: &CancelSignal,
        pending: &HashMap<String, usize>,
        elapsed: &HashSet<String>,
        candidates: &mut [DecisionCandidate],
        candidate_tokens: &[CancellationToken],
    ) {
        match pending.get(&signal.prompt_id) {
            Some(&idx) => {
                // Idempotent: a second veto for an already-canceled
                // candidate changes nothing.
                if candidates[idx].cancel() {
                    info!(
                        candidate_id = %candidates[idx].id,
                        participant = %signal.participant_id,
                        "Candidate vetoed"
                    );
                    // One veto cancels the decision for all participants
                    candidate_tokens[idx].cancel();
                }
            }
            None if elapsed.contains(&signal.prompt_id) => {
                debug!(prompt_id = %signal.prompt_id, "Veto after window elapsed, ignoring");
            }
            None => {
                warn!(prompt_id = %signal.prompt_id, "Cancel signal for unknown prompt, ignoring");
            }
        }
    }
}

/// Deliver one prompt, falling back to a channel mention when direct
/// delivery is denied. Returns None when delivery is impossible;
/// delivery failure never blocks the protocol for anyone else.
async fn deliver(
    messenger: &dyn Messenger,
    channel: &str,
    participant: &str,
    content: &str,
) -> Option<String> {
    match messenger.send_direct(participant, content).await {
        Ok(prompt_id) => Some(prompt_id),
        Err(DeliveryError::Denied(_)) => {
            debug!(participant, "Direct delivery denied, using channel fallback");
            let mention = format!("@{} {}", participant, content);
            match messenger.send_channel(channel, &mention).await {
                Ok(prompt_id) => Some(prompt_id),
                Err(e) => {
                    warn!(participant, error = %e, "Fallback delivery failed, skipping prompt");
                    None
                }
            }
        }
        Err(e) => {
            warn!(participant, error = %e, "Prompt delivery failed, skipping prompt");
            None
        }
    }
}
