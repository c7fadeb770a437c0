//! Chat session synchronization.
//!
//! `SessionEngine` owns the in-memory session collection and the active
//! session pointer. It hydrates from the local store, merges fetched history
//! with live-streamed messages, applies optimistic sends and read markings,
//! and persists every mutation.

pub mod engine;
mod live;
pub mod merge;
pub mod state;

pub use engine::SessionEngine;
pub use state::SyncState;
