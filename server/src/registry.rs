//! In-memory registry of live sessions
//!
//! The registry is the single source of truth for player state. It holds one
//! [`Session`] per open connection and is owned exclusively by the broker, so
//! every mutation flows through the broker's handlers.

use shared::{Movement, Session, SessionId};
use std::collections::HashMap;

/// Mapping from session id to player state
///
/// Keys are unique and carry no ordering. Every entry corresponds to a
/// connection that is currently open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session, replacing any previous record under the same id.
    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.player_id, session);
    }

    /// Removes a session, returning it if it was registered.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Looks up a session by id.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Applies a movement to exactly one session and returns the updated record.
    ///
    /// Returns None when the session is no longer registered.
    pub fn apply_movement(&mut self, id: SessionId, movement: &Movement) -> Option<&Session> {
        let session = self.sessions.get_mut(&id)?;
        session.apply(movement);
        Some(session)
    }

    /// Full copy of the registry, as sent in a `currentPlayers` event.
    pub fn snapshot(&self) -> HashMap<SessionId, Session> {
        self.sessions.clone()
    }

    /// Returns true if a session is registered under `id`.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Ids of every registered session, in no particular order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
