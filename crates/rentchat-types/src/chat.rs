//! Chat session and message types.
//!
//! A `ChatSession` is bound 1:1 to a reservation topic and holds an ordered
//! timeline of `ChatMessage`s plus the denormalized fields a session list
//! renders (last message, last message time, unread count).

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::lease::ReservationStatus;

/// Placeholder shown in session lists when a session has no messages.
pub const NO_MESSAGES: &str = "no messages";

/// Who authored a message.
///
/// Serialized as the plain strings `"self"`, `"system"` and `"other"`.
/// Any other persisted value is read back as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    Me,
    System,
    Other,
}

impl From<String> for Sender {
    fn from(value: String) -> Self {
        match value.as_str() {
            "self" => Sender::Me,
            "system" => Sender::System,
            _ => Sender::Other,
        }
    }
}

impl From<Sender> for String {
    fn from(value: Sender) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Me => write!(f, "self"),
            Sender::System => write!(f, "system"),
            Sender::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    System,
}

/// Read state of a message.
///
/// Only meaningful for messages from the other participant; self-sent and
/// system messages never count as unread whatever their status says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Reservation status this message announces, if it is a status transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReservationStatus>,
}

/// One timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Remote message id, or a locally generated id for optimistic sends.
    pub id: String,
    pub sender_id: Sender,
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    /// True when the message counts toward a session's unread total.
    pub fn is_unread(&self) -> bool {
        self.sender_id == Sender::Other && self.status != MessageStatus::Read
    }

    /// Reservation status announced by this message, if any.
    pub fn reservation_status(&self) -> Option<&ReservationStatus> {
        self.metadata.as_ref().and_then(|m| m.status.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    #[default]
    Renter,
    Owner,
    Support,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Renter => write!(f, "renter"),
            ParticipantRole::Owner => write!(f, "owner"),
            ParticipantRole::Support => write!(f, "support"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Away,
    #[default]
    Offline,
}

/// The other side of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default)]
    pub role: ParticipantRole,
    #[serde(default)]
    pub presence: Presence,
}

/// A conversation bound to one reservation topic.
///
/// Invariants maintained by every mutating method here:
/// - `messages` is in non-decreasing `timestamp` order, ties in insertion order;
/// - message ids are unique;
/// - `last_message`/`last_message_time` mirror the last element;
/// - `unread_count` equals the number of messages where `is_unread()` holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub participant: Participant,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub last_message: String,
    pub last_message_time: i64,
    #[serde(default)]
    pub unread_count: u32,
    /// Reservation this session was opened for, when its topic id differs.
    /// Lets a reservation id resolve to the session after a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
}

impl ChatSession {
    /// Build a session from an already merged timeline.
    ///
    /// The messages are sorted (stably) and the summary fields are derived.
    pub fn new(id: impl Into<String>, participant: Participant, messages: Vec<ChatMessage>) -> Self {
        let mut session = Self {
            id: id.into(),
            participant,
            messages,
            last_message: NO_MESSAGES.to_string(),
            last_message_time: 0,
            unread_count: 0,
            reservation_id: None,
        };
        session.messages.sort_by_key(|m| m.timestamp);
        session.refresh_summary();
        session.recount_unread();
        session
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    pub fn message(&self, message_id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Insert a message at its timestamp position.
    ///
    /// Returns `false` (and leaves the session untouched) when a message with
    /// the same id is already present. Equal timestamps keep arrival order.
    pub fn insert_message(&mut self, message: ChatMessage) -> bool {
        if self.contains_message(&message.id) {
            return false;
        }
        let unread = message.is_unread();
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
        if unread {
            self.unread_count += 1;
        }
        self.refresh_summary();
        true
    }

    /// Mark a single message read. Returns `true` if anything changed.
    pub fn mark_message_read(&mut self, message_id: &str) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        if message.status == MessageStatus::Read {
            return false;
        }
        let was_unread = message.is_unread();
        message.status = MessageStatus::Read;
        if was_unread {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        true
    }

    /// Mark every message read. Returns `true` if anything changed.
    pub fn mark_all_read(&mut self) -> bool {
        let mut changed = self.unread_count != 0;
        for message in &mut self.messages {
            if message.status != MessageStatus::Read {
                message.status = MessageStatus::Read;
                changed = true;
            }
        }
        self.unread_count = 0;
        changed
    }

    /// Re-derive `last_message` and `last_message_time` from the timeline.
    pub fn refresh_summary(&mut self) {
        match self.messages.last() {
            Some(last) => {
                self.last_message = last.text.clone();
                self.last_message_time = last.timestamp;
            }
            None => {
                self.last_message = NO_MESSAGES.to_string();
                self.last_message_time = 0;
            }
        }
    }

    pub fn recount_unread(&mut self) {
        self.unread_count = self.messages.iter().filter(|m| m.is_unread()).count() as u32;
    }
}
