//! Shared domain types for rentchat.
//!
//! This crate contains the types exchanged between the session engine, its
//! storage and gateway adapters, and the presentation layer: chat sessions,
//! messages, lease context, the raw feed shapes the gateway delivers, and
//! their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod feed;
pub mod lease;
