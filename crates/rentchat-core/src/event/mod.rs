//! Event bus for session engine notifications.
//!
//! Provides an `EngineEvents` bus that distributes `EngineEvent` messages to
//! all subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EngineEvents;
