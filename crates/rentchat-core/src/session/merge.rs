//! Timeline merge rules.
//!
//! Messages sent from this process get a temporary `local-` id. When the
//! server later delivers the same message under its own id (through the live
//! stream or a re-fetch) the local copy is reconciled instead of duplicated.

use std::collections::HashSet;

use uuid::Uuid;

use rentchat_types::chat::{ChatMessage, ChatSession, Sender};

/// Prefix of ids generated for optimistic sends.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// How far apart a local send and its server echo may be timestamped.
pub const ECHO_WINDOW_MS: i64 = 5 * 60 * 1000;

pub fn new_local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7())
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// True when `remote` is the server-side copy of the optimistic `local` send.
pub fn is_echo(local: &ChatMessage, remote: &ChatMessage) -> bool {
    is_local_id(&local.id)
        && !is_local_id(&remote.id)
        && local.sender_id == Sender::Me
        && remote.sender_id == Sender::Me
        && local.text == remote.text
        && (local.timestamp - remote.timestamp).abs() <= ECHO_WINDOW_MS
}

/// Result of applying one live message to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Inserted,
    /// The message confirmed a pending local send; the local copy took its id.
    Reconciled,
    Duplicate,
}

pub fn apply_live_message(session: &mut ChatSession, message: ChatMessage) -> LiveOutcome {
    if session.contains_message(&message.id) {
        return LiveOutcome::Duplicate;
    }
    if let Some(local) = session.messages.iter_mut().find(|m| is_echo(m, &message)) {
        local.id = message.id;
        return LiveOutcome::Reconciled;
    }
    session.insert_message(message);
    LiveOutcome::Inserted
}

/// Merge normalized history events and fetched messages with the cached session.
///
/// Duplicate ids keep their first occurrence, so fetched copies win over
/// cached ones (the caller carries the cached read status into them).
/// Cached messages the fetch no longer returns are kept: the backlog of a
/// pub/sub topic expires, the local transcript does not. Pending local sends
/// survive unless a fetched message is their echo. The result is not
/// sorted; [`ChatSession::new`] does that stably.
pub fn merge_timeline(
    history: Vec<ChatMessage>,
    fetched: Vec<ChatMessage>,
    cached: Option<&ChatSession>,
) -> Vec<ChatMessage> {
    let mut seen = HashSet::new();
    let mut merged: Vec<ChatMessage> = history
        .into_iter()
        .chain(fetched)
        .filter(|m| seen.insert(m.id.clone()))
        .collect();

    let Some(cached) = cached else {
        return merged;
    };

    let mut claimed = HashSet::new();
    let mut retained = Vec::new();
    for message in cached.messages.iter().filter(|m| !seen.contains(&m.id)) {
        if is_local_id(&message.id) {
            let echo = merged
                .iter()
                .enumerate()
                .find(|(i, remote)| !claimed.contains(i) && is_echo(message, remote));
            if let Some((i, _)) = echo {
                claimed.insert(i);
                continue;
            }
        }
        retained.push(message.clone());
    }
    merged.extend(retained);
    merged
}
