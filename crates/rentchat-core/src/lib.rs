//! Session synchronization engine and port definitions for rentchat.
//!
//! This crate defines the "ports" (store and gateway traits) that the
//! infrastructure layer implements, the pure message normalizer, and the
//! engine that merges local, fetched, and live-streamed messages into one
//! timeline per session. It depends only on `rentchat-types` -- never on
//! `rentchat-infra` or any database/HTTP crate.

pub mod event;
pub mod gateway;
pub mod normalizer;
pub mod session;
pub mod store;
