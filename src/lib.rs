//! quorum - Meeting decision capture orchestrator
//!
//! Observes voice-channel membership to bound meeting sessions, records
//! per-speaker audio, pipelines it through transcription and decision
//! extraction (retry with deterministic fallback), confirms candidate
//! decisions with participants through a timed veto window, publishes
//! the survivors, and cleans up.
//!
//! # Architecture
//!
//! - One session per channel, enforced by an atomic registry
//! - One orchestrator instance per session drives
//!   recording → processing → confirming → publishing → terminal
//! - All veto timers run concurrently; one veto cancels a candidate
//!   for every participant
//! - External cancellation short-circuits whatever stage is in flight
//!
//! # Modules
//!
//! - `adapters`: collaborator traits + HTTP/filesystem implementations
//! - `core`: orchestration logic (dispatcher, membership, veto, pipeline)
//! - `domain`: data structures (Session, DecisionCandidate, events)
//! - `cli`: command-line interface

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::QuorumConfig;
pub use core::{
    Collaborators, Dispatcher, MembershipTracker, RetryPolicy, SessionOrchestrator,
    SessionRegistry, VetoCoordinator, VetoOutcome,
};
pub use domain::{
    CancelSignal, CandidateStatus, DecisionCandidate, ExternalEvent, PresenceEvent, Session,
    SessionState,
};
