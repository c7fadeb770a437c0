//! In-memory engine state.
//!
//! Every mutation happens under the engine's lock as a synchronous
//! read-modify-write; nothing here is held across an await point.

use std::collections::{HashMap, HashSet};

use rentchat_types::chat::ChatSession;
use rentchat_types::lease::LeaseContext;

/// Load state of one session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No entry in memory.
    Unloaded,
    /// Entry present, possibly stale.
    Loaded,
    /// A load for this id is in flight.
    Syncing,
}

#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub sessions: Vec<ChatSession>,
    pub active_session_id: Option<String>,
    pub lease_context: Option<LeaseContext>,
    pub last_error: Option<String>,
    /// Generation of the uncached load currently driving the loading flag.
    pub loading_generation: Option<u64>,
    /// Bumped by every load and every explicit active-session switch.
    pub generation: u64,
    pub syncing: HashSet<String>,
    /// Caller-supplied reservation id -> resolved topic id.
    pub aliases: HashMap<String, String>,
}

impl EngineState {
    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Replace the session with the same id, or append it.
    pub fn upsert(&mut self, session: ChatSession) {
        match self.session_mut(&session.id) {
            Some(slot) => *slot = session,
            None => self.sessions.push(session),
        }
    }

    /// Add sessions read from the store without clobbering newer in-memory ones.
    ///
    /// Reservation aliases recorded on the stored sessions are restored too.
    pub fn absorb_persisted(&mut self, persisted: Vec<ChatSession>) {
        for session in persisted {
            if let Some(reservation_id) = &session.reservation_id {
                if *reservation_id != session.id {
                    self.aliases
                        .entry(reservation_id.clone())
                        .or_insert_with(|| session.id.clone());
                }
            }
            if self.session(&session.id).is_none() {
                self.sessions.push(session);
            }
        }
    }

    /// The topic id a caller-supplied id is known to resolve to.
    pub fn resolve_id<'a>(&'a self, id: &'a str) -> &'a str {
        self.aliases.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn sync_state(&self, id: &str) -> SyncState {
        let id = self.resolve_id(id);
        if self.syncing.contains(id) {
            SyncState::Syncing
        } else if self.session(id).is_some() {
            SyncState::Loaded
        } else {
            SyncState::Unloaded
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}
