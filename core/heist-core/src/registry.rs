//! At most one live session per community.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{HeistError, Result};
use crate::lock;
use crate::session::{Session, SessionHandle};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically checks for and inserts a new session.
    pub fn create(
        &self,
        community_id: &str,
        initiator_id: &str,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<Arc<Session>> {
        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(community_id) {
            return Err(HeistError::AlreadyInProgress);
        }
        let handle = SessionHandle {
            community_id: community_id.to_string(),
            session_id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let session = Arc::new(Session::new(handle, initiator_id, started_at, deadline));
        sessions.insert(community_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    pub fn get(&self, community_id: &str) -> Option<Arc<Session>> {
        lock(&self.sessions).get(community_id).cloned()
    }

    pub fn delete(&self, community_id: &str) -> Option<Arc<Session>> {
        lock(&self.sessions).remove(community_id)
    }

    /// Removes `session` only if it is still the one registered for its
    /// community. A finished worker must not evict a newer session.
    pub fn remove(&self, session: &Session) -> bool {
        let mut sessions = lock(&self.sessions);
        let is_current = sessions
            .get(session.community_id())
            .map(|current| current.handle() == session.handle())
            .unwrap_or(false);
        if is_current {
            sessions.remove(session.community_id());
        }
        is_current
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
