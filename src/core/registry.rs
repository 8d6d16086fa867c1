//! Channel → session registry.
//!
//! The only cross-session shared state. Insert-if-absent is atomic
//! under one lock, which enforces the at-most-one-session-per-channel
//! invariant; the lock is never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::domain::Session;

/// Handle to an active session shared between the tracker, the
/// dispatcher, and the owning orchestrator
pub type SharedSession = Arc<AsyncMutex<Session>>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("channel {0} already has an active session")]
    ChannelBusy(String),
}

/// Registry of active sessions, keyed by channel
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<String, (Uuid, SharedSession)>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a channel if none is active.
    ///
    /// Returns the new shared handle, or `ChannelBusy` if an active
    /// session already exists. Check-and-insert happens under one lock.
    pub fn create_if_absent(&self, channel: &str) -> Result<SharedSession, RegistryError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        if inner.contains_key(channel) {
            return Err(RegistryError::ChannelBusy(channel.to_string()));
        }

        let session = Session::new(channel);
        let id = session.id;
        let shared: SharedSession = Arc::new(AsyncMutex::new(session));
        inner.insert(channel.to_string(), (id, Arc::clone(&shared)));
        Ok(shared)
    }

    /// Look up the active session for a channel
    pub fn get(&self, channel: &str) -> Option<SharedSession> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.get(channel).map(|(_, s)| Arc::clone(s))
    }

    /// Session id for a channel, if one is active
    pub fn session_id(&self, channel: &str) -> Option<Uuid> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.get(channel).map(|(id, _)| *id)
    }

    /// Remove a channel's session, but only if it is still the given id.
    ///
    /// The id guard keeps a finished orchestrator from evicting a newer
    /// session that reused the channel after its own cleanup raced.
    pub fn remove(&self, channel: &str, session_id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        match inner.get(channel) {
            Some((id, _)) if *id == session_id => {
                inner.remove(channel);
                true
            }
            _ => false,
        }
    }

    /// Number of active sessions
    pub fn active_count(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_at_most_one_session_per_channel() {
        let registry = SessionRegistry::new();

        let first = registry.create_if_absent("standup").unwrap();
        assert!(matches!(
            registry.create_if_absent("standup"),
            Err(RegistryError::ChannelBusy(_))
        ));

        // Other channels are unaffected
        registry.create_if_absent("planning").unwrap();
        assert_eq!(registry.active_count(), 2);

        let id = first.lock().await.id;
        assert!(registry.remove("standup", id));
        assert!(registry.create_if_absent("standup").is_ok());
    }

    #[tokio::test]
    async fn test_remove_is_guarded_by_session_id() {
        let registry = SessionRegistry::new();

        let session = registry.create_if_absent("standup").unwrap();
        let id = session.lock().await.id;

        assert!(!registry.remove("standup", Uuid::new_v4()));
        assert_eq!(registry.active_count(), 1);
        assert!(registry.remove("standup", id));
        assert_eq!(registry.active_count(), 0);
    }
}
