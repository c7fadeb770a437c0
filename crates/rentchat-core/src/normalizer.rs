//! Message normalizer.
//!
//! Pure mapping from the two external record shapes -- live pub/sub records
//! and reservation status history events -- into canonical [`ChatMessage`]s.
//! Normalization never fails: missing fields and unknown codes fall back to
//! documented defaults.

use sha2::{Digest, Sha256};

use rentchat_types::chat::{ChatMessage, MessageKind, MessageMetadata, MessageStatus, Sender};
use rentchat_types::feed::{HistoryEvent, LiveMessage, SYSTEM_TAG};
use rentchat_types::lease::ReservationStatus;

/// Sender label older clients used for the local user instead of their name.
pub const LEGACY_SELF_LABEL: &str = "self";

/// Transcript text for status codes without a fixed phrase.
pub const GENERIC_STATUS_TEXT: &str = "Status changed";

/// Prefix of synthetic ids given to history-derived messages.
pub const HISTORY_ID_PREFIX: &str = "history-";

const NOTE_REASON_PREFIX: &str = "Reason: ";

/// Classify who sent a live record.
pub fn classify_sender(raw: &LiveMessage, current_user_identity: &str) -> Sender {
    let label = raw.title.as_deref().map(str::trim).unwrap_or_default();
    let identity = current_user_identity.trim();
    if (!identity.is_empty() && label == identity) || label == LEGACY_SELF_LABEL {
        Sender::Me
    } else if raw.has_tag(SYSTEM_TAG) {
        Sender::System
    } else {
        Sender::Other
    }
}

/// Convert a live (or batch-fetched) pub/sub record into a chat message.
///
/// `prior_status` preserves a status already known locally for this id.
/// Without one the message is `Sent` (unread); batch callers that treat
/// history as already seen pass `Some(MessageStatus::Read)`.
pub fn normalize_live_message(
    raw: &LiveMessage,
    current_user_identity: &str,
    prior_status: Option<MessageStatus>,
) -> ChatMessage {
    let kind = if raw.has_tag(SYSTEM_TAG) {
        MessageKind::System
    } else {
        MessageKind::Text
    };

    let metadata = raw.status_tag().map(|code| MessageMetadata {
        status: Some(ReservationStatus::parse(code)),
    });

    ChatMessage {
        id: raw.id.clone(),
        sender_id: classify_sender(raw, current_user_identity),
        text: raw.message.clone().unwrap_or_default(),
        timestamp: raw.time.saturating_mul(1000),
        kind,
        status: prior_status.unwrap_or(MessageStatus::Sent),
        metadata,
    }
}

/// Convert a reservation status history event into a system message.
///
/// History is never unread. The id is derived from the event's content, so
/// re-fetching the same history yields the same ids and merges idempotently.
pub fn normalize_history_event(event: &HistoryEvent) -> ChatMessage {
    let status = event.status_code().map(ReservationStatus::parse);

    let timestamp = event.timestamp.as_millis().unwrap_or_else(|| {
        tracing::warn!(timestamp = ?event.timestamp, "Unparseable history timestamp, using 0");
        0
    });

    let note = event
        .note
        .as_deref()
        .map(|n| n.strip_prefix(NOTE_REASON_PREFIX).unwrap_or(n).trim())
        .filter(|n| !n.is_empty());

    let text = match (note, &status) {
        (Some(note), _) => note.to_string(),
        (None, Some(status)) => status.phrase().unwrap_or(GENERIC_STATUS_TEXT).to_string(),
        (None, None) => GENERIC_STATUS_TEXT.to_string(),
    };

    ChatMessage {
        id: history_message_id(timestamp, status.as_ref(), event.note.as_deref()),
        sender_id: Sender::System,
        text,
        timestamp,
        kind: MessageKind::System,
        status: MessageStatus::Read,
        metadata: status.map(|s| MessageMetadata { status: Some(s) }),
    }
}

fn history_message_id(timestamp: i64, status: Option<&ReservationStatus>, note: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_be_bytes());
    hasher.update(status.map(ReservationStatus::code).unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(note.unwrap_or_default().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{HISTORY_ID_PREFIX}{}", &digest[..16])
}
