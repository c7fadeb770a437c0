//! Remote reservation gateway trait.
//!
//! The gateway bundles everything the engine needs from the outside world:
//! lease lookup, status history, message history, sending, and a live
//! subscription per topic. Wire formats are the implementation's business.

use std::pin::Pin;

use futures_util::Stream;

use rentchat_types::error::GatewayError;
use rentchat_types::feed::{HistoryEvent, LiveMessage};
use rentchat_types::lease::LeaseContext;

/// Live records for one topic. Dropping the stream unsubscribes.
pub type LiveStream = Pin<Box<dyn Stream<Item = Result<LiveMessage, GatewayError>> + Send + 'static>>;

/// Trait for the reservation backend and its chat transport.
///
/// Uses RPITIT for request/response calls and a boxed stream for the live
/// subscription (the stream outlives the borrow of `self`).
pub trait ReservationGateway: Send + Sync {
    /// Display label identifying the local user in a topic.
    fn current_user_identity(&self) -> String;

    /// Look up the reservation behind a reservation or topic id.
    fn load_lease_context(
        &self,
        reservation_or_topic_id: &str,
    ) -> impl std::future::Future<Output = Result<LeaseContext, GatewayError>> + Send;

    /// Status-change history for a topic. May be empty and unordered.
    fn fetch_history_events(
        &self,
        topic_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryEvent>, GatewayError>> + Send;

    /// Batch of previously published messages for a topic.
    fn fetch_messages(
        &self,
        topic_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<LiveMessage>, GatewayError>> + Send;

    /// Publish a message to a topic as the current user.
    fn send_message(
        &self,
        topic_id: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;

    /// Open a live subscription for a topic.
    ///
    /// With `since` (unix seconds) the server first replays records published
    /// at or after that time, so a reconnect does not lose what arrived while
    /// the stream was down. Replayed records the caller already holds are
    /// deduplicated by id.
    fn subscribe(&self, topic_id: &str, since: Option<i64>) -> LiveStream;
}
