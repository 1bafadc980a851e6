use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vizstream_error::VizError;

/// Tracks which sessions are still wanted by their caller.
///
/// Entries are created by [`SessionRegistry::register`] and removed when the
/// returned [`SessionGuard`] is dropped, so every exit path of a relay cleans
/// up exactly once. A stop request only flips the flag; the owning relay sees
/// it at its next check.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    live: Arc<Mutex<HashMap<String, bool>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, session_id: &str) -> Result<SessionGuard, VizError> {
        let mut entries = self.entries();
        if entries.contains_key(session_id) {
            return Err(VizError::SessionAlreadyExists {
                session_id: session_id.to_string(),
            });
        }
        entries.insert(session_id.to_string(), true);
        Ok(SessionGuard {
            registry: self.clone(),
            session_id: session_id.to_string(),
        })
    }

    /// `false` for sessions that were stopped or are not tracked.
    pub fn is_live(&self, session_id: &str) -> bool {
        self.entries().get(session_id).copied().unwrap_or(false)
    }

    /// Returns `false` when the session is not tracked.
    pub fn mark_stopped(&self, session_id: &str) -> bool {
        match self.entries().get_mut(session_id) {
            Some(live) => {
                *live = false;
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, session_id: &str) -> bool {
        self.entries().remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_live(&self) -> bool {
        self.registry.is_live(&self.session_id)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.session_id);
        tracing::debug!(session_id = %self.session_id, "session unregistered");
    }
}
