//! The session synchronization engine.
//!
//! `SessionEngine` is a cheap-to-clone handle over shared state. It is
//! generic over a `ReservationGateway` and a `SessionStore` so the core never
//! depends on a concrete transport or database.
//!
//! Rules every operation follows:
//! - state is mutated only inside `with_state`, a synchronous
//!   read-modify-write that is never held across an await;
//! - every mutation of a session is followed by `persist`, which writes the
//!   session's latest in-memory value, so the store converges even when
//!   writes interleave;
//! - in-flight loads write back only to their own resolved topic id, and
//!   only the newest load moves the active pointer or opens a subscription.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rentchat_types::chat::{ChatMessage, ChatSession, MessageKind, MessageStatus, Sender};
use rentchat_types::config::{ReconnectConfig, SyncConfig};
use rentchat_types::error::{EngineError, GatewayError};
use rentchat_types::event::EngineEvent;
use rentchat_types::feed::{HistoryEvent, LiveMessage};
use rentchat_types::lease::{LeaseContext, ReservationStatus};

use super::live;
use super::merge::{apply_live_message, merge_timeline, new_local_id, LiveOutcome};
use super::state::{EngineState, SyncState};
use crate::event::EngineEvents;
use crate::gateway::ReservationGateway;
use crate::normalizer::{normalize_history_event, normalize_live_message};
use crate::store::SessionStore;

/// Transcript text sent when the owner confirms the active reservation.
pub const CONFIRMATION_TEXT: &str = "Reservation confirmed. See you at pickup!";

/// Transcript text sent when the owner rejects the active reservation.
pub const REJECTION_TEXT: &str = "Sorry, this reservation has been rejected.";

/// Seconds the first live replay reaches back before the batch fetch started.
const LIVE_REPLAY_OVERLAP_SECS: i64 = 30;

struct LiveHandle {
    topic: String,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

struct RemoteSnapshot {
    lease: LeaseContext,
    topic: String,
    history: Vec<HistoryEvent>,
    messages: Vec<LiveMessage>,
    /// Live replay start (unix seconds), taken before the batch fetch.
    since: i64,
}

struct EngineInner<G, S> {
    gateway: G,
    store: S,
    config: SyncConfig,
    state: Mutex<EngineState>,
    hydrated: OnceCell<()>,
    persist_lock: tokio::sync::Mutex<()>,
    live: Mutex<Option<LiveHandle>>,
    events: EngineEvents,
}

/// Owns chat sessions for the lifetime of the process.
pub struct SessionEngine<G, S> {
    inner: Arc<EngineInner<G, S>>,
}

impl<G, S> Clone for SessionEngine<G, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G, S> SessionEngine<G, S>
where
    G: ReservationGateway + 'static,
    S: SessionStore + 'static,
{
    /// Create an engine with its collaborators injected.
    pub fn new(gateway: G, store: S, config: SyncConfig) -> Self {
        let events = EngineEvents::new(config.event_capacity);
        Self {
            inner: Arc::new(EngineInner {
                gateway,
                store,
                config,
                state: Mutex::new(EngineState::default()),
                hydrated: OnceCell::new(),
                persist_lock: tokio::sync::Mutex::new(()),
                live: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.inner.gateway
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn events(&self) -> &EngineEvents {
        &self.inner.events
    }

    pub(crate) fn reconnect_policy(&self) -> &ReconnectConfig {
        &self.inner.config.reconnect
    }

    // --- Snapshots ---

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.with_state(|state| state.sessions.clone())
    }

    pub fn session(&self, session_id: &str) -> Option<ChatSession> {
        self.with_state(|state| state.session(state.resolve_id(session_id)).cloned())
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.with_state(|state| state.active_session_id.clone())
    }

    pub fn active_session(&self) -> Option<ChatSession> {
        self.with_state(|state| {
            state
                .active_session_id
                .as_deref()
                .and_then(|id| state.session(id))
                .cloned()
        })
    }

    pub fn is_loading(&self) -> bool {
        self.with_state(|state| state.loading_generation.is_some())
    }

    pub fn last_error(&self) -> Option<String> {
        self.with_state(|state| state.last_error.clone())
    }

    pub fn lease_context(&self) -> Option<LeaseContext> {
        self.with_state(|state| state.lease_context.clone())
    }

    pub fn sync_state(&self, session_id: &str) -> SyncState {
        self.with_state(|state| state.sync_state(session_id))
    }

    pub fn total_unread(&self) -> u32 {
        self.with_state(|state| state.sessions.iter().map(|s| s.unread_count).sum())
    }

    pub fn is_hydrated(&self) -> bool {
        self.inner.hydrated.initialized()
    }

    /// Topic of the currently open live subscription, if any.
    pub fn live_topic(&self) -> Option<String> {
        self.inner
            .live
            .lock()
            .expect("live handle lock poisoned")
            .as_ref()
            .map(|h| h.topic.clone())
    }

    // --- Operations ---

    /// Read persisted sessions into memory, once per engine.
    ///
    /// Concurrent callers wait on the first caller's read. A store failure
    /// still marks the engine hydrated (with whatever is already in memory).
    pub async fn hydrate(&self) {
        self.inner
            .hydrated
            .get_or_init(|| async {
                let persisted = match self.inner.store.get_all_sessions().await {
                    Ok(sessions) => sessions,
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to read persisted sessions, starting empty");
                        Vec::new()
                    }
                };
                let count = self.with_state(|state| {
                    state.absorb_persisted(persisted);
                    state.sessions.len()
                });
                tracing::info!(session_count = count, "Chat sessions hydrated");
                self.publish(EngineEvent::Hydrated { session_count: count });
            })
            .await;
    }

    /// Load (or refresh) the chat session for a reservation and go live on it.
    ///
    /// A cached session becomes active immediately and is refreshed in the
    /// background; a refresh failure then returns the cached copy and leaves
    /// `last_error` untouched. Without a cache the loading flag is raised and
    /// a failure is recorded in `last_error`.
    pub async fn load_chat_session(&self, reservation_id: &str) -> Result<ChatSession, EngineError> {
        self.hydrate().await;

        let (generation, cached_id) = self.with_state(|state| {
            let generation = state.next_generation();
            let known_id = state.resolve_id(reservation_id).to_string();
            state.syncing.insert(known_id.clone());
            let cached_id = state.session(&known_id).map(|s| s.id.clone());
            match &cached_id {
                Some(id) => state.active_session_id = Some(id.clone()),
                None => {
                    state.loading_generation = Some(generation);
                    state.last_error = None;
                }
            }
            (generation, cached_id)
        });
        self.close_live_subscription();
        if let Some(id) = &cached_id {
            self.publish(EngineEvent::ActiveSessionChanged {
                session_id: Some(id.clone()),
            });
        }

        let remote = match self.fetch_remote(reservation_id).await {
            Ok(remote) => remote,
            Err(err) => return self.fail_load(reservation_id, generation, err),
        };

        let identity = self.inner.gateway.current_user_identity();
        let RemoteSnapshot {
            lease,
            topic,
            history,
            messages,
            since,
        } = remote;

        let (session, current) = self.with_state(|state| {
            let known_id = state.resolve_id(reservation_id).to_string();
            state.syncing.remove(&known_id);
            state.syncing.remove(&topic);
            if topic != reservation_id {
                state.aliases.insert(reservation_id.to_string(), topic.clone());
            }

            let merged = {
                let cached = state.session(&topic).or_else(|| state.session(&known_id));
                let prior: HashMap<&str, MessageStatus> = cached
                    .map(|s| s.messages.iter().map(|m| (m.id.as_str(), m.status)).collect())
                    .unwrap_or_default();

                let history: Vec<ChatMessage> =
                    history.iter().map(normalize_history_event).collect();
                // Batch history counts as seen unless the local copy says otherwise.
                let fetched: Vec<ChatMessage> = messages
                    .iter()
                    .filter(|raw| raw.is_message())
                    .map(|raw| {
                        let status = prior
                            .get(raw.id.as_str())
                            .copied()
                            .unwrap_or(MessageStatus::Read);
                        normalize_live_message(raw, &identity, Some(status))
                    })
                    .collect();

                merge_timeline(history, fetched, cached)
            };

            let mut session = ChatSession::new(topic.clone(), lease.counterparty(), merged);
            session.reservation_id = (lease.id != topic).then(|| lease.id.clone());
            state.upsert(session.clone());

            let current = state.is_current(generation);
            if current {
                state.active_session_id = Some(topic.clone());
                state.lease_context = Some(lease);
                state.last_error = None;
            }
            if state.loading_generation == Some(generation) {
                state.loading_generation = None;
            }
            (session, current)
        });

        tracing::info!(
            session_id = %topic,
            messages = session.messages.len(),
            unread = session.unread_count,
            "Chat session loaded"
        );
        self.persist(&topic).await;
        self.publish(EngineEvent::SessionUpdated {
            session_id: topic.clone(),
        });

        if current {
            self.publish(EngineEvent::ActiveSessionChanged {
                session_id: Some(topic.clone()),
            });
            self.open_live_subscription(&topic, generation, since);
        } else {
            tracing::debug!(session_id = %topic, "Superseded load merged without activating");
        }

        Ok(session)
    }

    /// Point the active session at `session_id` without loading it.
    ///
    /// Closes a live subscription for any other topic and supersedes loads
    /// still in flight.
    pub fn set_active_session(&self, session_id: Option<&str>) {
        let resolved = self.with_state(|state| {
            state.next_generation();
            let resolved = session_id.map(|id| state.resolve_id(id).to_string());
            let lease_matches = match (&state.lease_context, &resolved) {
                (Some(lease), Some(id)) => lease.resolved_topic_id() == id,
                _ => false,
            };
            if !lease_matches {
                state.lease_context = None;
            }
            state.loading_generation = None;
            state.active_session_id = resolved.clone();
            resolved
        });

        if self.live_topic() != resolved {
            self.close_live_subscription();
        }
        self.publish(EngineEvent::ActiveSessionChanged { session_id: resolved });
    }

    /// Append a message to the active session and publish it.
    ///
    /// The message is applied and persisted before the network call. A send
    /// failure is logged; the optimistic copy stays in the timeline. Returns
    /// `None` for blank text or when no session is active.
    pub async fn send_message(&self, text: &str) -> Option<ChatMessage> {
        if text.trim().is_empty() {
            return None;
        }

        let (topic, message) = self.with_state(|state| {
            let topic = state.active_session_id.clone()?;
            let session = state.session_mut(&topic)?;
            let now = Utc::now().timestamp_millis();
            let message = ChatMessage {
                id: new_local_id(),
                sender_id: Sender::Me,
                text: text.to_string(),
                timestamp: now.max(session.last_message_time),
                kind: MessageKind::Text,
                status: MessageStatus::Sent,
                metadata: None,
            };
            session.insert_message(message.clone());
            Some((topic, message))
        })?;

        self.persist(&topic).await;
        self.publish(EngineEvent::SessionUpdated {
            session_id: topic.clone(),
        });

        let timeout = self.fetch_timeout_secs();
        if let Err(err) = bounded(timeout, self.inner.gateway.send_message(&topic, text)).await {
            tracing::warn!(session_id = %topic, message_id = %message.id, error = %err, "Failed to send message");
        }

        Some(message)
    }

    /// Mark one message read. Returns `true` if it was unread.
    pub async fn mark_message_as_read(&self, session_id: &str, message_id: &str) -> bool {
        let changed = self.with_state(|state| {
            let id = state.resolve_id(session_id).to_string();
            state
                .session_mut(&id)
                .and_then(|s| s.mark_message_read(message_id).then_some(id))
        });
        self.finish_read_change(changed).await
    }

    /// Mark every message in a session read.
    pub async fn mark_as_read(&self, session_id: &str) -> bool {
        let changed = self.with_state(|state| {
            let id = state.resolve_id(session_id).to_string();
            state
                .session_mut(&id)
                .and_then(|s| s.mark_all_read().then_some(id))
        });
        self.finish_read_change(changed).await
    }

    /// Confirm the active reservation through the chat transcript.
    pub async fn confirm_reservation(&self) -> Result<ChatMessage, EngineError> {
        self.announce_status(ReservationStatus::Confirmed, CONFIRMATION_TEXT)
            .await
    }

    /// Reject the active reservation through the chat transcript.
    pub async fn reject_reservation(&self) -> Result<ChatMessage, EngineError> {
        self.announce_status(ReservationStatus::Rejected, REJECTION_TEXT)
            .await
    }

    /// Stop the current live subscription, if one is open.
    pub fn close_live_subscription(&self) {
        let handle = self
            .inner
            .live
            .lock()
            .expect("live handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            tracing::debug!(session_id = %handle.topic, "Live subscription closed");
        }
    }

    // --- Internals ---

    /// Apply one record delivered by the live subscription for `topic`.
    pub(crate) async fn apply_live(&self, topic: &str, raw: LiveMessage) {
        if !raw.is_message() {
            tracing::trace!(session_id = %topic, event = ?raw.event, "Ignoring live control record");
            return;
        }

        let identity = self.inner.gateway.current_user_identity();
        let message = normalize_live_message(&raw, &identity, None);
        let message_id = message.id.clone();

        let outcome =
            self.with_state(|state| state.session_mut(topic).map(|s| apply_live_message(s, message)));

        match outcome {
            None => {
                tracing::warn!(session_id = %topic, "Live message for a session not in memory");
            }
            Some(LiveOutcome::Duplicate) => {
                tracing::trace!(session_id = %topic, %message_id, "Dropping duplicate live message");
            }
            Some(outcome) => {
                self.persist(topic).await;
                self.publish(EngineEvent::SessionUpdated {
                    session_id: topic.to_string(),
                });
                if outcome == LiveOutcome::Inserted {
                    self.publish(EngineEvent::LiveMessage {
                        session_id: topic.to_string(),
                        message_id,
                    });
                }
            }
        }
    }

    async fn announce_status(
        &self,
        status: ReservationStatus,
        text: &str,
    ) -> Result<ChatMessage, EngineError> {
        let reservation_id = self.with_state(|state| {
            if state.active_session_id.is_none() {
                return Err(EngineError::NoActiveSession);
            }
            let lease = state
                .lease_context
                .as_mut()
                .ok_or(EngineError::NoLeaseContext)?;
            lease.status = status.clone();
            Ok(lease.id.clone())
        })?;

        tracing::info!(%reservation_id, %status, "Reservation status changed locally");
        self.publish(EngineEvent::LeaseStatusChanged {
            reservation_id,
            status,
        });

        self.send_message(text)
            .await
            .ok_or(EngineError::NoActiveSession)
    }

    async fn fetch_remote(&self, reservation_id: &str) -> Result<RemoteSnapshot, GatewayError> {
        let timeout = self.fetch_timeout_secs();
        let gateway = &self.inner.gateway;

        let lease = bounded(timeout, gateway.load_lease_context(reservation_id)).await?;
        let topic = lease.resolved_topic_id().to_string();

        let since = Utc::now().timestamp() - LIVE_REPLAY_OVERLAP_SECS;
        let (history, messages) = futures_util::future::try_join(
            bounded(timeout, gateway.fetch_history_events(&topic)),
            bounded(timeout, gateway.fetch_messages(&topic)),
        )
        .await?;

        Ok(RemoteSnapshot {
            lease,
            topic,
            history,
            messages,
            since,
        })
    }

    fn fail_load(
        &self,
        reservation_id: &str,
        generation: u64,
        err: GatewayError,
    ) -> Result<ChatSession, EngineError> {
        let message = format!("Failed to load chat session: {err}");
        let cached = self.with_state(|state| {
            let known_id = state.resolve_id(reservation_id).to_string();
            state.syncing.remove(&known_id);
            if state.loading_generation == Some(generation) {
                state.loading_generation = None;
            }
            let cached = state.session(&known_id).cloned();
            if cached.is_none() && state.is_current(generation) {
                state.last_error = Some(message.clone());
            }
            cached
        });

        match cached {
            Some(session) => {
                tracing::warn!(session_id = %session.id, error = %err, "Background refresh failed, keeping cached session");
                Ok(session)
            }
            None => {
                tracing::warn!(%reservation_id, error = %err, "Chat session load failed");
                self.publish(EngineEvent::LoadFailed {
                    session_id: reservation_id.to_string(),
                    error: message,
                });
                Err(err.into())
            }
        }
    }

    fn open_live_subscription(&self, topic: &str, generation: u64, since: i64) {
        let mut live = self.inner.live.lock().expect("live handle lock poisoned");
        if !self.with_state(|state| state.is_current(generation)) {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(live::run(
            self.clone(),
            topic.to_string(),
            Some(since),
            cancel.clone(),
        ));
        let previous = live.replace(LiveHandle {
            topic: topic.to_string(),
            cancel,
            _task: task,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        tracing::info!(session_id = %topic, "Live subscription started");
    }

    async fn finish_read_change(&self, changed: Option<String>) -> bool {
        match changed {
            Some(id) => {
                self.persist(&id).await;
                self.publish(EngineEvent::SessionUpdated { session_id: id });
                true
            }
            None => false,
        }
    }

    /// Write the latest in-memory copy of a session to the store.
    ///
    /// Serialized so a slower write can never land after a newer one.
    async fn persist(&self, session_id: &str) {
        let _guard = self.inner.persist_lock.lock().await;
        let Some(snapshot) = self.with_state(|state| state.session(session_id).cloned()) else {
            return;
        };
        if let Err(err) = self.inner.store.save_session(&snapshot).await {
            tracing::warn!(session_id = %session_id, error = %err, "Failed to persist chat session");
        }
    }

    fn publish(&self, event: EngineEvent) {
        self.inner.events.publish(event);
    }

    fn fetch_timeout_secs(&self) -> u64 {
        self.inner.config.fetch_timeout_secs.max(1)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let mut state = self.inner.state.lock().expect("engine state lock poisoned");
        f(&mut state)
    }
}

async fn bounded<T>(
    secs: u64,
    fut: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| GatewayError::Timeout(secs))?
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::{broadcast, mpsc, Notify};

    use rentchat_types::chat::Participant;
    use rentchat_types::error::StoreError;
    use rentchat_types::feed::EventTime;
    use rentchat_types::lease::LeaseParty;

    use crate::gateway::LiveStream;

    type LiveSender = mpsc::UnboundedSender<Result<LiveMessage, GatewayError>>;
    type LiveReceiver = mpsc::UnboundedReceiver<Result<LiveMessage, GatewayError>>;

    // --- Fakes ---

    #[derive(Default)]
    struct FakeGatewayInner {
        identity: String,
        leases: Mutex<HashMap<String, LeaseContext>>,
        history: Mutex<HashMap<String, Vec<HistoryEvent>>>,
        messages: Mutex<HashMap<String, Vec<LiveMessage>>>,
        live: Mutex<HashMap<String, VecDeque<LiveReceiver>>>,
        lease_gates: Mutex<HashMap<String, Arc<Notify>>>,
        fetch_gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
        fetch_completions: Mutex<Vec<&'static str>>,
        send_gate: Mutex<Option<Arc<Notify>>>,
        sent: Mutex<Vec<(String, String)>>,
        subscriptions: AtomicUsize,
        subscribed_since: Mutex<Vec<Option<i64>>>,
        fail_lease: AtomicBool,
        fail_send: AtomicBool,
    }

    #[derive(Clone, Default)]
    struct FakeGateway {
        inner: Arc<FakeGatewayInner>,
    }

    impl FakeGateway {
        fn new(identity: &str) -> Self {
            Self {
                inner: Arc::new(FakeGatewayInner {
                    identity: identity.to_string(),
                    ..Default::default()
                }),
            }
        }

        fn add_lease(&self, id: &str, topic: Option<&str>) {
            let lease = LeaseContext {
                id: id.to_string(),
                topic_id: topic.map(String::from),
                renter: LeaseParty {
                    id: "renter-1".to_string(),
                    name: "John".to_string(),
                    email: Some("john@example.com".to_string()),
                    phone: None,
                },
                ..Default::default()
            };
            self.inner.leases.lock().unwrap().insert(id.to_string(), lease);
        }

        fn set_history(&self, topic: &str, events: Vec<HistoryEvent>) {
            self.inner.history.lock().unwrap().insert(topic.to_string(), events);
        }

        fn set_messages(&self, topic: &str, messages: Vec<LiveMessage>) {
            self.inner.messages.lock().unwrap().insert(topic.to_string(), messages);
        }

        /// Queue a live stream for the next `subscribe(topic)` call.
        fn live_channel(&self, topic: &str) -> LiveSender {
            let (tx, rx) = mpsc::unbounded_channel();
            self.inner
                .live
                .lock()
                .unwrap()
                .entry(topic.to_string())
                .or_default()
                .push_back(rx);
            tx
        }

        fn gate_lease(&self, id: &str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.inner
                .lease_gates
                .lock()
                .unwrap()
                .insert(id.to_string(), gate.clone());
            gate
        }

        /// Hold the `"history"` or `"messages"` fetch until notified.
        fn gate_fetch(&self, kind: &'static str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.inner.fetch_gates.lock().unwrap().insert(kind, gate.clone());
            gate
        }

        async fn finish_fetch(&self, kind: &'static str) {
            let gate = self.inner.fetch_gates.lock().unwrap().get(kind).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.inner.fetch_completions.lock().unwrap().push(kind);
        }

        fn fetch_completions(&self) -> Vec<&'static str> {
            self.inner.fetch_completions.lock().unwrap().clone()
        }

        fn gate_send(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.inner.send_gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.inner.sent.lock().unwrap().clone()
        }
    }

    impl ReservationGateway for FakeGateway {
        fn current_user_identity(&self) -> String {
            self.inner.identity.clone()
        }

        async fn load_lease_context(&self, id: &str) -> Result<LeaseContext, GatewayError> {
            let gate = self.inner.lease_gates.lock().unwrap().get(id).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.inner.fail_lease.load(Ordering::SeqCst) {
                return Err(GatewayError::Transport("connection refused".to_string()));
            }
            self.inner
                .leases
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or(GatewayError::NotFound)
        }

        async fn fetch_history_events(&self, topic_id: &str) -> Result<Vec<HistoryEvent>, GatewayError> {
            self.finish_fetch("history").await;
            Ok(self.inner.history.lock().unwrap().get(topic_id).cloned().unwrap_or_default())
        }

        async fn fetch_messages(&self, topic_id: &str) -> Result<Vec<LiveMessage>, GatewayError> {
            self.finish_fetch("messages").await;
            Ok(self.inner.messages.lock().unwrap().get(topic_id).cloned().unwrap_or_default())
        }

        async fn send_message(&self, topic_id: &str, text: &str) -> Result<(), GatewayError> {
            let gate = self.inner.send_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.inner.fail_send.load(Ordering::SeqCst) {
                return Err(GatewayError::Http {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.inner
                .sent
                .lock()
                .unwrap()
                .push((topic_id.to_string(), text.to_string()));
            Ok(())
        }

        fn subscribe(&self, topic_id: &str, since: Option<i64>) -> LiveStream {
            self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);
            self.inner.subscribed_since.lock().unwrap().push(since);
            let rx = self
                .inner
                .live
                .lock()
                .unwrap()
                .get_mut(topic_id)
                .and_then(|queue| queue.pop_front());
            Box::pin(async_stream::stream! {
                if let Some(mut rx) = rx {
                    while let Some(item) = rx.recv().await {
                        yield item;
                    }
                }
            })
        }
    }

    #[derive(Clone, Default)]
    struct MemoryStore {
        sessions: Arc<Mutex<HashMap<String, ChatSession>>>,
        reads: Arc<AtomicUsize>,
        fail_reads: Arc<AtomicBool>,
        fail_writes: Arc<AtomicBool>,
    }

    impl MemoryStore {
        fn stored(&self, id: &str) -> Option<ChatSession> {
            self.sessions.lock().unwrap().get(id).cloned()
        }
    }

    impl SessionStore for MemoryStore {
        async fn get_all_sessions(&self) -> Result<Vec<ChatSession>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("locked".to_string()));
            }
            Ok(self.sessions.lock().unwrap().values().cloned().collect())
        }

        async fn save_session(&self, session: &ChatSession) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Query("disk full".to_string()));
            }
            self.sessions
                .lock()
                .unwrap()
                .insert(session.id.clone(), session.clone());
            Ok(())
        }
    }

    // --- Helpers ---

    fn quiet_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.reconnect.enabled = false;
        config
    }

    fn engine(gateway: &FakeGateway, store: &MemoryStore) -> SessionEngine<FakeGateway, MemoryStore> {
        SessionEngine::new(gateway.clone(), store.clone(), quiet_config())
    }

    fn raw(id: &str, time: i64, text: &str, title: &str) -> LiveMessage {
        LiveMessage {
            id: id.to_string(),
            time,
            message: Some(text.to_string()),
            title: Some(title.to_string()),
            tags: Some(Vec::new()),
            ..Default::default()
        }
    }

    fn history(status: &str, millis: i64) -> HistoryEvent {
        HistoryEvent {
            timestamp: EventTime::Millis(millis),
            status: Some(status.to_string()),
            reason: None,
            note: None,
        }
    }

    fn assert_unread_invariant(session: &ChatSession) {
        let expected = session.messages.iter().filter(|m| m.is_unread()).count() as u32;
        assert_eq!(session.unread_count, expected, "unread invariant broken");
        if let Some(last) = session.messages.last() {
            assert_eq!(session.last_message, last.text);
            assert_eq!(session.last_message_time, last.timestamp);
        }
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<EngineEvent>,
        mut pred: impl FnMut(&EngineEvent) -> bool,
    ) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for engine event")
    }

    async fn wait_live(rx: &mut broadcast::Receiver<EngineEvent>, id: &str) {
        wait_for(rx, |e| matches!(e, EngineEvent::LiveMessage { message_id, .. } if message_id == id)).await;
    }

    // --- hydrate ---

    #[tokio::test]
    async fn hydrate_is_idempotent_and_reads_once() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        store
            .save_session(&ChatSession::new("t1", Participant::default(), Vec::new()))
            .await
            .unwrap();
        let engine = engine(&gateway, &store);

        engine.hydrate().await;
        let first = engine.sessions();
        engine.hydrate().await;

        assert_eq!(engine.sessions(), first);
        assert_eq!(first.len(), 1);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert!(engine.is_hydrated());
    }

    #[tokio::test]
    async fn concurrent_hydrate_reads_once() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        let engine = engine(&gateway, &store);

        tokio::join!(engine.hydrate(), engine.hydrate());

        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hydrate_fails_open() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        store.fail_reads.store(true, Ordering::SeqCst);
        let engine = engine(&gateway, &store);

        engine.hydrate().await;

        assert!(engine.is_hydrated());
        assert!(engine.sessions().is_empty());
    }

    // --- load ---

    #[tokio::test]
    async fn load_merges_history_and_live_message() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let t0 = 1_700_000_000_000;
        let t1 = 1_700_000_100;
        gateway.set_history("res-1", vec![history("reservation_pending", t0)]);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();

        engine.load_chat_session("res-1").await.unwrap();
        live.send(Ok(raw("m1", t1, "Hello", "John"))).unwrap();
        wait_live(&mut events, "m1").await;

        let session = engine.active_session().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].sender_id, Sender::System);
        assert_eq!(session.messages[0].text, "Reservation is pending");
        assert_eq!(session.messages[0].timestamp, t0);
        assert_eq!(session.messages[1].sender_id, Sender::Other);
        assert_eq!(session.messages[1].text, "Hello");
        assert_eq!(session.messages[1].timestamp, t1 * 1000);
        assert_eq!(session.unread_count, 1);
        assert_unread_invariant(&session);
        assert_eq!(store.stored("res-1").unwrap(), session);
    }

    #[tokio::test]
    async fn load_sorts_regardless_of_source_order() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        gateway.set_history(
            "res-1",
            vec![history("completed", 5_000), history("pending", 1_000)],
        );
        gateway.set_messages(
            "res-1",
            vec![raw("m3", 4, "third", "John"), raw("m2", 2, "second", "Owner")],
        );
        let engine = engine(&gateway, &store);

        let session = engine.load_chat_session("res-1").await.unwrap();

        let stamps: Vec<i64> = session.messages.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 2_000, 4_000, 5_000]);
        assert_eq!(session.last_message, "Reservation is completed");
        // Batch-fetched messages count as already seen.
        assert_eq!(session.unread_count, 0);
        assert_eq!(session.messages[1].sender_id, Sender::Me);
        assert!(!engine.is_loading());
        assert_eq!(engine.sync_state("res-1"), SyncState::Loaded);
    }

    /// Load `res-1` releasing the gated fetches in the given order.
    async fn load_with_fetch_order(
        first: &'static str,
        second: &'static str,
    ) -> (ChatSession, Vec<&'static str>) {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        gateway.set_history(
            "res-1",
            vec![history("pending", 1_000), history("confirmed", 3_000)],
        );
        gateway.set_messages(
            "res-1",
            vec![raw("m2", 2, "second", "John"), raw("m4", 4, "fourth", "Owner")],
        );
        let first_gate = gateway.gate_fetch(first);
        let second_gate = gateway.gate_fetch(second);
        let engine = engine(&gateway, &store);

        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.load_chat_session("res-1").await }
        });
        first_gate.notify_one();
        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.fetch_completions().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        second_gate.notify_one();

        let session = task.await.unwrap().unwrap();
        (session, gateway.fetch_completions())
    }

    #[tokio::test]
    async fn load_result_is_independent_of_fetch_completion_order() {
        let (history_first, order_a) = load_with_fetch_order("history", "messages").await;
        let (messages_first, order_b) = load_with_fetch_order("messages", "history").await;

        assert_eq!(order_a, vec!["history", "messages"]);
        assert_eq!(order_b, vec!["messages", "history"]);
        assert_eq!(history_first, messages_first);
        let stamps: Vec<i64> = history_first.messages.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 2_000, 3_000, 4_000]);
        assert_unread_invariant(&history_first);
    }

    #[tokio::test]
    async fn reload_preserves_local_unread_status() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();

        engine.load_chat_session("res-1").await.unwrap();
        live.send(Ok(raw("m1", 10, "ping", "John"))).unwrap();
        wait_live(&mut events, "m1").await;
        assert_eq!(engine.session("res-1").unwrap().unread_count, 1);

        gateway.set_messages("res-1", vec![raw("m1", 10, "ping", "John")]);
        let session = engine.load_chat_session("res-1").await.unwrap();

        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.unread_count, 1);
        assert_unread_invariant(&session);
    }

    #[tokio::test]
    async fn reload_keeps_cached_messages_absent_from_fetch() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();

        engine.load_chat_session("res-1").await.unwrap();
        live.send(Ok(raw("m1", 10, "ping", "John"))).unwrap();
        wait_live(&mut events, "m1").await;

        // The topic backlog has expired: the fetch returns nothing.
        let session = engine.load_chat_session("res-1").await.unwrap();

        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].id, "m1");
        assert_eq!(session.unread_count, 1);
        assert_unread_invariant(&session);
        assert_eq!(store.stored("res-1").unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn load_resolves_topic_id() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", Some("rent-topic-1"));
        gateway.set_messages("rent-topic-1", vec![raw("m1", 1, "hi", "John")]);
        let engine = engine(&gateway, &store);

        let session = engine.load_chat_session("res-1").await.unwrap();

        assert_eq!(session.id, "rent-topic-1");
        assert_eq!(engine.active_session_id().as_deref(), Some("rent-topic-1"));
        assert_eq!(engine.live_topic().as_deref(), Some("rent-topic-1"));
        assert_eq!(engine.session("res-1").unwrap().id, "rent-topic-1");
        assert_eq!(session.participant.name, "John");
        assert_eq!(session.participant.contact.as_deref(), Some("john@example.com"));
    }

    #[tokio::test]
    async fn reservation_alias_survives_restart() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", Some("rent-topic-1"));
        gateway.set_messages("rent-topic-1", vec![raw("m1", 1, "hi", "John")]);
        engine(&gateway, &store).load_chat_session("res-1").await.unwrap();
        assert_eq!(
            store.stored("rent-topic-1").unwrap().reservation_id.as_deref(),
            Some("res-1")
        );

        let restarted = engine(&gateway, &store);
        restarted.hydrate().await;

        assert_eq!(restarted.session("res-1").unwrap().id, "rent-topic-1");
        assert_eq!(restarted.sync_state("res-1"), SyncState::Loaded);
    }

    #[tokio::test]
    async fn cached_session_becomes_active_before_fetch_completes() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        store
            .save_session(&ChatSession::new("res-1", Participant::default(), Vec::new()))
            .await
            .unwrap();
        gateway.add_lease("res-1", None);
        let gate = gateway.gate_lease("res-1");
        let engine = engine(&gateway, &store);
        engine.hydrate().await;
        let mut events = engine.events().subscribe();

        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.load_chat_session("res-1").await }
        });
        wait_for(&mut events, |e| matches!(e, EngineEvent::ActiveSessionChanged { .. })).await;

        assert_eq!(engine.active_session_id().as_deref(), Some("res-1"));
        assert!(!engine.is_loading());
        assert_eq!(engine.sync_state("res-1"), SyncState::Syncing);

        gate.notify_one();
        task.await.unwrap().unwrap();
        assert_eq!(engine.sync_state("res-1"), SyncState::Loaded);
    }

    #[tokio::test]
    async fn uncached_load_raises_loading_flag() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let gate = gateway.gate_lease("res-1");
        let engine = engine(&gateway, &store);
        engine.hydrate().await;

        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.load_chat_session("res-1").await }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while !engine.is_loading() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(engine.active_session_id().is_none());

        gate.notify_one();
        task.await.unwrap().unwrap();
        assert!(!engine.is_loading());
        assert_eq!(engine.active_session_id().as_deref(), Some("res-1"));
    }

    #[tokio::test]
    async fn initial_load_failure_is_surfaced() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        let engine = engine(&gateway, &store);

        let result = engine.load_chat_session("missing").await;

        assert!(matches!(result, Err(EngineError::Gateway(GatewayError::NotFound))));
        assert!(engine.last_error().unwrap().contains("reservation not found"));
        assert!(!engine.is_loading());
        assert_eq!(engine.sync_state("missing"), SyncState::Unloaded);
    }

    #[tokio::test]
    async fn background_refresh_failure_is_silent() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        gateway.set_messages("res-1", vec![raw("m1", 1, "hi", "John")]);
        let engine = engine(&gateway, &store);
        engine.load_chat_session("res-1").await.unwrap();

        gateway.inner.fail_lease.store(true, Ordering::SeqCst);
        let session = engine.load_chat_session("res-1").await.unwrap();

        assert_eq!(session.messages.len(), 1);
        assert!(engine.last_error().is_none());
        assert!(!engine.is_loading());
        assert_eq!(engine.active_session_id().as_deref(), Some("res-1"));
    }

    #[tokio::test]
    async fn superseded_load_never_steals_active_session() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-a", None);
        gateway.add_lease("res-b", None);
        gateway.set_messages("res-a", vec![raw("a1", 1, "from a", "John")]);
        let gate = gateway.gate_lease("res-a");
        let engine = engine(&gateway, &store);
        engine.hydrate().await;

        let slow = tokio::spawn({
            let engine = engine.clone();
            async move { engine.load_chat_session("res-a").await }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.sync_state("res-a") != SyncState::Syncing {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        engine.load_chat_session("res-b").await.unwrap();
        gate.notify_one();
        slow.await.unwrap().unwrap();

        assert_eq!(engine.active_session_id().as_deref(), Some("res-b"));
        assert_eq!(engine.live_topic().as_deref(), Some("res-b"));
        assert_eq!(engine.lease_context().unwrap().id, "res-b");
        assert_eq!(engine.session("res-a").unwrap().messages[0].text, "from a");
        assert!(engine.session("res-b").unwrap().messages.is_empty());
    }

    // --- live ---

    #[tokio::test]
    async fn duplicate_live_delivery_is_noop() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        gateway.set_messages("res-1", vec![raw("m1", 1, "old", "John")]);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();
        engine.load_chat_session("res-1").await.unwrap();

        live.send(Ok(raw("m2", 2, "new", "John"))).unwrap();
        live.send(Ok(raw("m2", 2, "new", "John"))).unwrap();
        live.send(Ok(raw("m1", 1, "old", "John"))).unwrap();
        live.send(Ok(raw("m3", 3, "newest", "John"))).unwrap();
        wait_live(&mut events, "m3").await;

        let session = engine.session("res-1").unwrap();
        assert_eq!(session.messages.iter().filter(|m| m.id == "m2").count(), 1);
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.unread_count, 2);
        assert_eq!(session.last_message, "newest");
        assert_unread_invariant(&session);
    }

    #[tokio::test]
    async fn live_self_and_system_messages_stay_read() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();
        engine.load_chat_session("res-1").await.unwrap();

        live.send(Ok(raw("s1", 1, "from me elsewhere", "Owner"))).unwrap();
        let mut system = raw("s2", 2, "Reservation confirmed", "bot");
        system.tags = Some(vec!["system".to_string(), "status:confirmed".to_string()]);
        live.send(Ok(system)).unwrap();
        wait_live(&mut events, "s2").await;

        let session = engine.session("res-1").unwrap();
        assert_eq!(session.messages[0].sender_id, Sender::Me);
        assert_eq!(session.messages[1].sender_id, Sender::System);
        assert_eq!(session.unread_count, 0);
    }

    #[tokio::test]
    async fn live_control_records_are_ignored() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();
        engine.load_chat_session("res-1").await.unwrap();

        let mut keepalive = raw("k1", 1, "", "");
        keepalive.event = Some("keepalive".to_string());
        live.send(Ok(keepalive)).unwrap();
        live.send(Ok(raw("m1", 2, "real", "John"))).unwrap();
        wait_live(&mut events, "m1").await;

        assert_eq!(engine.session("res-1").unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn live_error_keeps_session_state() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();
        engine.load_chat_session("res-1").await.unwrap();

        live.send(Ok(raw("m1", 1, "hello", "John"))).unwrap();
        live.send(Err(GatewayError::Stream("reset".to_string()))).unwrap();
        wait_for(&mut events, |e| matches!(e, EngineEvent::SubscriptionClosed { .. })).await;

        let session = engine.session("res-1").unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(engine.active_session_id().as_deref(), Some("res-1"));
    }

    #[tokio::test]
    async fn live_reconnects_after_stream_error() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let first = gateway.live_channel("res-1");
        let second = gateway.live_channel("res-1");
        let mut config = SyncConfig::default();
        config.reconnect.initial_backoff_ms = 1;
        let engine = SessionEngine::new(gateway.clone(), store.clone(), config);
        let mut events = engine.events().subscribe();
        engine.load_chat_session("res-1").await.unwrap();

        first.send(Err(GatewayError::Stream("reset".to_string()))).unwrap();
        second.send(Ok(raw("m1", 1, "after reconnect", "John"))).unwrap();
        wait_live(&mut events, "m1").await;

        assert_eq!(gateway.inner.subscriptions.load(Ordering::SeqCst), 2);
        engine.close_live_subscription();
        assert!(engine.live_topic().is_none());
    }

    #[tokio::test]
    async fn live_reconnect_resumes_from_last_delivered_message() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let first = gateway.live_channel("res-1");
        let second = gateway.live_channel("res-1");
        let mut config = SyncConfig::default();
        config.reconnect.initial_backoff_ms = 1;
        let engine = SessionEngine::new(gateway.clone(), store.clone(), config);
        let mut events = engine.events().subscribe();
        engine.load_chat_session("res-1").await.unwrap();

        let delivered_at = Utc::now().timestamp() + 60;
        first.send(Ok(raw("m0", delivered_at, "before drop", "John"))).unwrap();
        wait_live(&mut events, "m0").await;
        first.send(Err(GatewayError::Stream("reset".to_string()))).unwrap();
        // The server replays m0 on resume; it must not be inserted twice.
        second.send(Ok(raw("m0", delivered_at, "before drop", "John"))).unwrap();
        second.send(Ok(raw("m1", delivered_at + 1, "after drop", "John"))).unwrap();
        wait_live(&mut events, "m1").await;

        let since = gateway.inner.subscribed_since.lock().unwrap().clone();
        assert_eq!(since.len(), 2);
        let initial = since[0].expect("first subscription replays from the fetch");
        assert!(initial <= Utc::now().timestamp() - LIVE_REPLAY_OVERLAP_SECS);
        assert_eq!(since[1], Some(delivered_at));

        let session = engine.session("res-1").unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.unread_count, 2);
        engine.close_live_subscription();
    }

    #[tokio::test]
    async fn switching_sessions_closes_previous_subscription() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-a", None);
        gateway.add_lease("res-b", None);
        let engine = engine(&gateway, &store);

        engine.load_chat_session("res-a").await.unwrap();
        assert_eq!(engine.live_topic().as_deref(), Some("res-a"));
        engine.load_chat_session("res-b").await.unwrap();
        assert_eq!(engine.live_topic().as_deref(), Some("res-b"));

        engine.set_active_session(Some("res-a"));
        assert_eq!(engine.active_session_id().as_deref(), Some("res-a"));
        assert!(engine.live_topic().is_none());
        assert!(engine.lease_context().is_none());
    }

    // --- send ---

    #[tokio::test]
    async fn send_is_optimistic() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        gateway.set_messages("res-1", vec![raw("m1", 1, "hi owner", "John")]);
        let engine = engine(&gateway, &store);
        engine.load_chat_session("res-1").await.unwrap();
        let gate = gateway.gate_send();
        let mut events = engine.events().subscribe();

        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send_message("hi").await }
        });
        wait_for(&mut events, |e| matches!(e, EngineEvent::SessionUpdated { .. })).await;

        let session = engine.active_session().unwrap();
        assert_eq!(session.messages.last().unwrap().text, "hi");
        assert_eq!(session.messages.last().unwrap().sender_id, Sender::Me);
        assert_eq!(session.last_message, "hi");
        assert_eq!(store.stored("res-1").unwrap().last_message, "hi");
        assert!(gateway.sent().is_empty());

        gate.notify_one();
        let sent = task.await.unwrap().unwrap();
        assert!(sent.id.starts_with("local-"));
        assert_eq!(gateway.sent(), vec![("res-1".to_string(), "hi".to_string())]);
    }

    #[tokio::test]
    async fn rapid_sends_keep_order() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let engine = engine(&gateway, &store);
        engine.load_chat_session("res-1").await.unwrap();

        engine.send_message("a").await.unwrap();
        engine.send_message("b").await.unwrap();

        let session = engine.active_session().unwrap();
        let texts: Vec<&str> = session.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(session.last_message, "b");
        assert_eq!(session.unread_count, 0);
    }

    #[tokio::test]
    async fn send_ignores_blank_text_and_missing_session() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        let engine = engine(&gateway, &store);
        assert!(engine.send_message("hello").await.is_none());

        gateway.add_lease("res-1", None);
        engine.load_chat_session("res-1").await.unwrap();
        assert!(engine.send_message("   ").await.is_none());
        assert!(engine.send_message("").await.is_none());
        assert!(engine.active_session().unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn send_failure_keeps_optimistic_message() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        gateway.inner.fail_send.store(true, Ordering::SeqCst);
        let engine = engine(&gateway, &store);
        engine.load_chat_session("res-1").await.unwrap();

        assert!(engine.send_message("still here").await.is_some());
        assert_eq!(engine.active_session().unwrap().last_message, "still here");
    }

    #[tokio::test]
    async fn live_echo_of_own_send_is_not_duplicated() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();
        engine.load_chat_session("res-1").await.unwrap();

        let sent = engine.send_message("on my way").await.unwrap();
        live.send(Ok(raw("srv-1", sent.timestamp / 1000, "on my way", "Owner"))).unwrap();
        live.send(Ok(raw("m2", sent.timestamp / 1000 + 1, "great", "John"))).unwrap();
        wait_live(&mut events, "m2").await;

        let session = engine.active_session().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].id, "srv-1");
    }

    #[tokio::test]
    async fn persistence_failure_does_not_block_mutation() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        gateway.add_lease("res-1", None);
        let engine = engine(&gateway, &store);

        engine.load_chat_session("res-1").await.unwrap();
        engine.send_message("hello").await.unwrap();

        assert_eq!(engine.active_session().unwrap().last_message, "hello");
        assert!(store.stored("res-1").is_none());
    }

    // --- read state ---

    async fn engine_with_unread(count: usize) -> (SessionEngine<FakeGateway, MemoryStore>, MemoryStore) {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let live = gateway.live_channel("res-1");
        let engine = engine(&gateway, &store);
        let mut events = engine.events().subscribe();
        engine.load_chat_session("res-1").await.unwrap();
        for i in 0..count {
            let id = format!("u{i}");
            live.send(Ok(raw(&id, i as i64 + 1, "unread", "John"))).unwrap();
            wait_live(&mut events, &id).await;
        }
        (engine, store)
    }

    #[tokio::test]
    async fn mark_as_read_clears_all() {
        let (engine, store) = engine_with_unread(3).await;
        assert_eq!(engine.session("res-1").unwrap().unread_count, 3);
        assert_eq!(engine.total_unread(), 3);

        assert!(engine.mark_as_read("res-1").await);

        let session = engine.session("res-1").unwrap();
        assert_eq!(session.unread_count, 0);
        assert!(session.messages.iter().all(|m| m.status == MessageStatus::Read));
        assert_eq!(store.stored("res-1").unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn mark_message_as_read_decrements_once() {
        let (engine, store) = engine_with_unread(2).await;

        assert!(engine.mark_message_as_read("res-1", "u0").await);
        assert!(!engine.mark_message_as_read("res-1", "u0").await);
        assert!(!engine.mark_message_as_read("res-1", "nope").await);
        assert!(!engine.mark_message_as_read("nope", "u1").await);

        let session = engine.session("res-1").unwrap();
        assert_eq!(session.unread_count, 1);
        assert_unread_invariant(&session);
        assert_eq!(store.stored("res-1").unwrap().unread_count, 1);
    }

    // --- confirm / reject ---

    #[tokio::test]
    async fn confirm_updates_lease_and_transcript() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let engine = engine(&gateway, &store);
        engine.load_chat_session("res-1").await.unwrap();

        let message = engine.confirm_reservation().await.unwrap();

        assert_eq!(message.text, CONFIRMATION_TEXT);
        assert_eq!(engine.lease_context().unwrap().status, ReservationStatus::Confirmed);
        assert_eq!(engine.active_session().unwrap().last_message, CONFIRMATION_TEXT);
        assert_eq!(
            gateway.sent(),
            vec![("res-1".to_string(), CONFIRMATION_TEXT.to_string())]
        );
    }

    #[tokio::test]
    async fn reject_updates_lease_and_transcript() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        gateway.add_lease("res-1", None);
        let engine = engine(&gateway, &store);
        engine.load_chat_session("res-1").await.unwrap();

        engine.reject_reservation().await.unwrap();

        assert_eq!(engine.lease_context().unwrap().status, ReservationStatus::Rejected);
        assert_eq!(engine.active_session().unwrap().last_message, REJECTION_TEXT);
    }

    #[tokio::test]
    async fn confirm_requires_lease_context() {
        let gateway = FakeGateway::new("Owner");
        let store = MemoryStore::default();
        let engine = engine(&gateway, &store);

        assert!(matches!(
            engine.confirm_reservation().await,
            Err(EngineError::NoActiveSession)
        ));

        store
            .save_session(&ChatSession::new("res-1", Participant::default(), Vec::new()))
            .await
            .unwrap();
        engine.hydrate().await;
        engine.set_active_session(Some("res-1"));
        assert!(matches!(
            engine.reject_reservation().await,
            Err(EngineError::NoLeaseContext)
        ));
    }
}
