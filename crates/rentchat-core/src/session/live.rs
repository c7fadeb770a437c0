//! Live subscription task.
//!
//! One task per open subscription drains the gateway's live stream into the
//! engine. When the stream errors or ends it re-subscribes with exponential
//! backoff (if enabled); the cancellation token stops it at any point.
//!
//! Every subscription asks the server to replay from a resume point: first
//! the time the batch fetch started, then the newest message delivered so
//! far. Records that arrive twice are dropped by the engine's id dedup.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use rentchat_types::config::ReconnectConfig;
use rentchat_types::event::EngineEvent;
use rentchat_types::feed::LiveMessage;

use super::engine::SessionEngine;
use crate::gateway::ReservationGateway;
use crate::store::SessionStore;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before reconnect attempt `attempt` (1-based).
pub(crate) fn backoff_delay(policy: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let millis = policy.initial_backoff_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Advance the resume point past a delivered message. Control records do not
/// move it.
fn advance_cursor(cursor: Option<i64>, raw: &LiveMessage) -> Option<i64> {
    if !raw.is_message() {
        return cursor;
    }
    Some(cursor.map_or(raw.time, |at| at.max(raw.time)))
}

pub(crate) async fn run<G, S>(
    engine: SessionEngine<G, S>,
    topic: String,
    since: Option<i64>,
    cancel: CancellationToken,
) where
    G: ReservationGateway + 'static,
    S: SessionStore + 'static,
{
    let policy = engine.reconnect_policy().clone();
    let mut failures: u32 = 0;
    let mut cursor = since;

    loop {
        let mut stream = engine.gateway().subscribe(&topic, cursor);
        tracing::debug!(session_id = %topic, since = ?cursor, "Live subscription opened");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id = %topic, "Live subscription cancelled");
                    return;
                }
                item = stream.next() => match item {
                    Some(Ok(raw)) => {
                        failures = 0;
                        cursor = advance_cursor(cursor, &raw);
                        engine.apply_live(&topic, raw).await;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(session_id = %topic, error = %err, "Live subscription error");
                        break;
                    }
                    None => {
                        tracing::debug!(session_id = %topic, "Live stream ended");
                        break;
                    }
                }
            }
        }

        if !policy.enabled {
            break;
        }
        failures += 1;
        if failures > policy.max_attempts {
            tracing::warn!(
                session_id = %topic,
                attempts = policy.max_attempts,
                "Live subscription giving up after repeated failures"
            );
            break;
        }

        let delay = backoff_delay(&policy, failures);
        tracing::debug!(session_id = %topic, attempt = failures, ?delay, "Reconnecting live subscription");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    engine
        .events()
        .publish(EngineEvent::SubscriptionClosed { session_id: topic });
}
