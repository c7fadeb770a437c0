//! External record shapes consumed by the message normalizer.
//!
//! These mirror what the reservation backend and the pub/sub topic deliver.
//! They are never stored directly; the normalizer turns them into
//! [`ChatMessage`](crate::chat::ChatMessage)s.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Tag marking a live record as a system event.
pub const SYSTEM_TAG: &str = "system";

/// Prefix of the tag carrying a reservation status code (`status:<code>`).
pub const STATUS_TAG_PREFIX: &str = "status:";

/// A timestamp as the backend sends it: epoch milliseconds or a date string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    Millis(i64),
    Text(String),
}

impl EventTime {
    /// Epoch milliseconds, or `None` if the text form is not a recognizable date.
    ///
    /// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and numeric strings.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            EventTime::Millis(ms) => Some(*ms),
            EventTime::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Some(ms);
                }
                if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                    return Some(dt.timestamp_millis());
                }
                chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc().timestamp_millis())
            }
        }
    }
}

/// A server-recorded status transition of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    #[serde(alias = "confirmation_date", alias = "created_at", alias = "date")]
    pub timestamp: EventTime,
    #[serde(default)]
    pub status: Option<String>,
    /// Older backends send the status code under `reason`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl HistoryEvent {
    /// The status code of this transition. A non-blank `status` takes
    /// precedence over `reason`.
    pub fn status_code(&self) -> Option<&str> {
        [self.status.as_deref(), self.reason.as_deref()]
            .into_iter()
            .flatten()
            .find(|code| !code.trim().is_empty())
    }
}

/// A raw pub/sub record, as streamed live or returned by a batch poll.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiveMessage {
    pub id: String,
    /// Epoch seconds.
    #[serde(default)]
    pub time: i64,
    /// Record kind (`message`, `open`, `keepalive`, ...). Absent means `message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Sender label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl LiveMessage {
    /// True for records that carry a chat message rather than stream control.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }

    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| t == tag)
    }

    /// The code of the first `status:<code>` tag, if present.
    pub fn status_tag(&self) -> Option<&str> {
        self.tags()
            .iter()
            .find_map(|t| t.strip_prefix(STATUS_TAG_PREFIX))
            .filter(|code| !code.is_empty())
    }
}
