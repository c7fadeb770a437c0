//! Event types for the session engine event bus.
//!
//! `EngineEvent` is broadcast whenever engine-owned state changes, so a
//! presentation layer can re-render from fresh snapshots instead of polling.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};

use crate::lease::ReservationStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Persisted sessions have been read into memory (or hydration failed open).
    Hydrated { session_count: usize },

    /// A session's timeline, read state, or summary changed.
    SessionUpdated { session_id: String },

    /// The active session pointer moved.
    ActiveSessionChanged { session_id: Option<String> },

    /// A load failed with no cached data to fall back on.
    LoadFailed { session_id: String, error: String },

    /// A new message arrived over the live subscription.
    LiveMessage { session_id: String, message_id: String },

    /// The live subscription for a session stopped delivering.
    SubscriptionClosed { session_id: String },

    /// The active lease context's status was changed locally.
    LeaseStatusChanged {
        reservation_id: String,
        status: ReservationStatus,
    },
}
