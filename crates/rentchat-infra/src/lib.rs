//! Infrastructure layer for rentchat.
//!
//! Contains implementations of the port traits defined in `rentchat-core`:
//! the SQLite session store and the HTTP reservation gateway, plus config
//! loading and data directory resolution.

pub mod config;
pub mod filesystem;
pub mod gateway;
pub mod sqlite;
