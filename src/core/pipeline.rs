//! Transcription and extraction stages.
//!
//! Each stage wraps one remote call behind the retry policy and
//! substitutes a deterministic local fallback once retries are
//! exhausted. Stages never mutate the session; the orchestrator applies
//! their output.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::adapters::{
    AudioRef, ExtractionBackend, StageError, TranscriptionBackend,
};
use crate::domain::{DecisionCandidate, TranscriptSegment};

use super::retry::RetryPolicy;

/// Assumed capture bitrate for the transcription fallback's duration
/// heuristic: 16 kHz mono, 16-bit PCM.
const FALLBACK_BYTES_PER_SECOND: u64 = 32_000;

/// Fallback extraction discards matches shorter than this
const MIN_DECISION_LEN: usize = 12;

/// Two fallback matches with token-set similarity at or above this
/// collapse into one candidate
const JACCARD_THRESHOLD: f64 = 0.6;

/// Phrase patterns the fallback extractor recognizes. Group 1 captures
/// the decision clause.
const DECISION_PATTERNS: &[&str] = &[
    r"(?i)\bwe(?:'ve| have)? decided to\s+([^.!?\n]+)",
    r"(?i)\bthe decision is to\s+([^.!?\n]+)",
    r"(?i)\bwe agreed to\s+([^.!?\n]+)",
    r"(?i)\b(?:we(?:'re| are) )?going to go with\s+([^.!?\n]+)",
    r"(?i)\bwe(?:'ll| will| should)\s+([^.!?\n]+)",
    r"(?i)\blet's\s+([^.!?\n]+)",
];

/// Generic clauses that match the patterns but carry no decision
const GENERIC_DENYLIST: &[&str] = &[
    "do it",
    "do that",
    "move on",
    "get started",
    "take a look",
    "talk about it",
    "think about it",
    "circle back",
    "go ahead",
    "wait and see what happens",
];

fn decision_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DECISION_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("decision pattern must compile"))
            .collect()
    })
}

/// Transcription stage: audio references in, transcript segments out
pub struct TranscriptionStage {
    backend: Arc<dyn TranscriptionBackend>,
    retry: RetryPolicy,
}

impl TranscriptionStage {
    pub fn new(backend: Arc<dyn TranscriptionBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Transcribe the session's audio.
    ///
    /// An empty audio map short-circuits to an empty transcript without
    /// touching the remote service. Retries exhausted → local placeholder
    /// segments derived from file sizes.
    #[instrument(skip_all, fields(participants = refs.len()))]
    pub async fn run(
        &self,
        refs: &HashMap<String, AudioRef>,
    ) -> Result<Vec<TranscriptSegment>, StageError> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }

        match self
            .retry
            .run("transcribe", |_| self.backend.transcribe(refs))
            .await
        {
            Ok(segments) => Ok(rebase_offsets(segments)),
            Err(e) => {
                warn!(error = %e, "Transcription exhausted retries, using placeholder fallback");
                self.fallback(refs).await
            }
        }
    }

    /// Placeholder transcript: one marker segment per participant with an
    /// estimated duration from the captured file's size.
    async fn fallback(
        &self,
        refs: &HashMap<String, AudioRef>,
    ) -> Result<Vec<TranscriptSegment>, StageError> {
        let mut participants: Vec<&AudioRef> = refs.values().collect();
        participants.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));

        let mut segments = Vec::with_capacity(participants.len());
        for audio in participants {
            let meta = tokio::fs::metadata(&audio.path).await.map_err(|e| {
                StageError::Terminal(format!(
                    "audio reference missing for {}: {}",
                    audio.participant_id, e
                ))
            })?;

            let secs = meta.len() / FALLBACK_BYTES_PER_SECOND;
            segments.push(TranscriptSegment {
                participant_id: audio.participant_id.clone(),
                text: format!(
                    "[inaudible: ~{}s of speech from {}]",
                    secs.max(1),
                    audio.participant_id
                ),
                start_offset: 0,
                end_offset: 0,
            });
        }

        Ok(rebase_offsets(segments))
    }
}

/// Extraction stage: transcript in, decision candidates out
pub struct ExtractionStage {
    backend: Arc<dyn ExtractionBackend>,
    retry: RetryPolicy,
}

impl ExtractionStage {
    pub fn new(backend: Arc<dyn ExtractionBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Extract decision candidates from the transcript.
    ///
    /// Empty transcript text short-circuits to an empty candidate list.
    /// Retries exhausted → local regex scan over the combined text.
    #[instrument(skip_all, fields(segments = transcript.len()))]
    pub async fn run(
        &self,
        transcript: &[TranscriptSegment],
    ) -> Result<Vec<DecisionCandidate>, StageError> {
        let combined = combine(transcript);
        if combined.trim().is_empty() {
            return Ok(Vec::new());
        }

        match self
            .retry
            .run("extract", |_| self.backend.extract(&combined))
            .await
        {
            Ok(decisions) => Ok(decisions
                .into_iter()
                .map(|d| DecisionCandidate::new(d.text, d.speaker_id))
                .collect()),
            Err(e) => {
                warn!(error = %e, "Extraction exhausted retries, using regex fallback");
                let candidates = fallback_extract(&combined, transcript);
                info!(count = candidates.len(), "Fallback extraction finished");
                Ok(candidates)
            }
        }
    }
}

/// Join segment texts and assign combined-text character offsets
pub fn rebase_offsets(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    let mut offset = 0usize;
    for segment in &mut segments {
        segment.start_offset = offset;
        segment.end_offset = offset + segment.text.len();
        offset = segment.end_offset + 1; // joining space
    }
    segments
}

fn combine(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Regex scan over the combined transcript: match decision phrases,
/// drop short/generic clauses, collapse near-duplicates, and attribute
/// each match to the speaker whose segment contains its offset.
pub fn fallback_extract(
    combined: &str,
    transcript: &[TranscriptSegment],
) -> Vec<DecisionCandidate> {
    // (offset, clause) for every pattern hit, in text order
    let mut matches: Vec<(usize, String)> = Vec::new();
    for pattern in decision_patterns() {
        for captures in pattern.captures_iter(combined) {
            let full = captures.get(0).expect("group 0 always present");
            let clause = captures
                .get(1)
                .map(|m| normalize_clause(m.as_str()))
                .unwrap_or_default();
            matches.push((full.start(), clause));
        }
    }
    matches.sort_by_key(|(offset, _)| *offset);

    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut kept: Vec<(usize, String)> = Vec::new();

    for (offset, clause) in matches {
        if clause.len() < MIN_DECISION_LEN {
            continue;
        }
        if GENERIC_DENYLIST.contains(&clause.to_lowercase().as_str()) {
            continue;
        }
        // Exact-duplicate fast path before the pairwise similarity scan
        if !seen_keys.insert(content_key(&clause)) {
            continue;
        }
        if kept
            .iter()
            .any(|(_, existing)| jaccard(existing, &clause) >= JACCARD_THRESHOLD)
        {
            continue;
        }
        kept.push((offset, clause));
    }

    kept.into_iter()
        .map(|(offset, clause)| {
            let speaker = speaker_at_offset(transcript, offset);
            DecisionCandidate::new(clause, speaker)
        })
        .collect()
}

/// Trim whitespace and trailing filler punctuation from a matched clause
fn normalize_clause(raw: &str) -> String {
    raw.trim()
        .trim_end_matches([',', ';', ':'])
        .trim()
        .to_string()
}

/// Token-set Jaccard similarity on lowercased alphanumeric tokens
pub fn jaccard(a: &str, b: &str) -> f64 {
    let tokens_a = token_set(a);
    let tokens_b = token_set(b);

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Stable content key (first 8 bytes of SHA256 over normalized tokens)
fn content_key(text: &str) -> String {
    let mut tokens: Vec<String> = token_set(text).into_iter().collect();
    tokens.sort();

    let mut hasher = Sha256::new();
    hasher.update(tokens.join(" ").as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Find the speaker whose segment contains the given combined-text offset
fn speaker_at_offset(transcript: &[TranscriptSegment], offset: usize) -> String {
    transcript
        .iter()
        .find(|s| offset >= s.start_offset && offset < s.end_offset)
        .or_else(|| transcript.last())
        .map(|s| s.participant_id.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
