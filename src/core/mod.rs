//! Orchestration core: membership tracking, the per-session state
//! machine, pipeline stages with retry and fallback, and the veto
//! confirmation protocol.

pub mod dispatcher;
pub mod membership;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod session_log;
pub mod veto;

pub use dispatcher::Dispatcher;
pub use membership::{MembershipTracker, SessionSignal};
pub use orchestrator::{Collaborators, SessionOrchestrator};
pub use pipeline::{ExtractionStage, TranscriptionStage};
pub use registry::{RegistryError, SessionRegistry, SharedSession};
pub use retry::RetryPolicy;
pub use session_log::SessionLog;
pub use veto::{VetoCoordinator, VetoOutcome};
