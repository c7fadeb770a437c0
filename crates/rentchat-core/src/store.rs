//! Local session store trait.
//!
//! Durable persistence of chat sessions keyed by session id. The engine is
//! the only writer; implementations live in rentchat-infra.

use rentchat_types::chat::ChatSession;
use rentchat_types::error::StoreError;

/// Trait for persisted chat sessions.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait SessionStore: Send + Sync {
    /// Read every persisted session.
    fn get_all_sessions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ChatSession>, StoreError>> + Send;

    /// Upsert a session keyed by its id.
    fn save_session(
        &self,
        session: &ChatSession,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}
