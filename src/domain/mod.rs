//! Domain data structures.
//!
//! Pure data: the session record, decision candidates, and the events
//! that flow into and out of the core. No I/O happens here.

pub mod candidate;
pub mod events;
pub mod session;

pub use candidate::{CandidateStatus, DecisionCandidate};
pub use events::{CancelSignal, ExternalEvent, PresenceEvent, SessionEvent, SessionEventKind};
pub use session::{Session, SessionState, TranscriptSegment};
