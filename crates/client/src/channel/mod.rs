// Realtime channel: one authenticated session plus event demultiplexing.
//
// Inbound frames are validated against the closed `ServerEvent` set and
// fanned out to one broadcast stream per category (message, presence,
// typing, notification, error, connection status). Subscribers see events
// from the moment they subscribe; nothing is buffered for late subscribers.
//
// Outbound emits are fire-and-forget. Only `send_message` reports a missing
// session so its callers can fall back to REST; everything else is dropped
// silently while disconnected.
//
// There is no automatic reconnect. Connection attempts are driven from
// outside (see `auth::bind_channel`).

pub mod transport;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlance_common::protocol::events::{
    CategorizedEvent, ClientEvent, ConversationRef, ErrorEvent, MessageEvent, NotificationEvent,
    PresenceEvent, SendMessagePayload, ServerEvent, TranslationNotice, TypingEvent, WireFrame,
    WordRoomRef,
};
use parlance_common::types::AuthToken;

use crate::error::ClientError;

pub use transport::{Transport, TransportConnection, WsTransport};

/// Default per-stream broadcast capacity.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

// ── Connection state ────────────────────────────────────────────────

/// Current state of the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outbound operations the conversation and typing layers need. Implemented
/// by [`RealtimeChannel`]; mocked in tests.
pub trait ChannelLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Emit `send_message`. Errors with [`ClientError::NotConnected`] when
    /// there is no live session.
    fn send_message(&self, payload: SendMessagePayload) -> Result<(), ClientError>;

    fn join_conversation(&self, conversation_id: Uuid);

    fn leave_conversation(&self, conversation_id: Uuid);

    fn start_typing(&self, conversation_id: Uuid);

    fn stop_typing(&self, conversation_id: Uuid);
}

// ── Channel ─────────────────────────────────────────────────────────

/// Why a session's pump loop ended.
#[derive(Debug)]
enum SessionEnd {
    /// The local side dropped the outbound queue (disconnect).
    Requested,
    /// The peer closed the session cleanly.
    ClosedByPeer,
    /// The server sent `connect_error`; already reported on the error stream.
    Refused,
    Failed(ClientError),
}

#[derive(Debug, Default)]
struct Session {
    /// Bumped on every connect attempt and every disconnect, so results
    /// of superseded attempts and pumps can be recognized and discarded.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
}

struct Streams {
    messages: broadcast::Sender<MessageEvent>,
    presence: broadcast::Sender<PresenceEvent>,
    typing: broadcast::Sender<TypingEvent>,
    notifications: broadcast::Sender<NotificationEvent>,
    errors: broadcast::Sender<ErrorEvent>,
    status: broadcast::Sender<ConnectionState>,
}

impl Streams {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: broadcast::channel(capacity).0,
            presence: broadcast::channel(capacity).0,
            typing: broadcast::channel(capacity).0,
            notifications: broadcast::channel(capacity).0,
            errors: broadcast::channel(capacity).0,
            status: broadcast::channel(capacity).0,
        }
    }
}

struct Inner<T: Transport> {
    transport: T,
    session: Mutex<Session>,
    state_tx: watch::Sender<ConnectionState>,
    streams: Streams,
}

impl<T: Transport> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "channel state changed");
            let _ = self.streams.status.send(next);
        }
    }

    fn dispatch(&self, frame: WireFrame) -> Option<SessionEnd> {
        let name = frame.event.clone();
        let event = match ServerEvent::from_frame(frame) {
            Ok(event) => event,
            Err(error) => {
                warn!(event = %name, error = %error, "dropping invalid channel event");
                return None;
            }
        };

        let streams = &self.streams;
        match event.categorize() {
            CategorizedEvent::Message(e) => {
                let _ = streams.messages.send(e);
            }
            CategorizedEvent::Presence(e) => {
                let _ = streams.presence.send(e);
            }
            CategorizedEvent::Typing(e) => {
                let _ = streams.typing.send(e);
            }
            CategorizedEvent::Notification(e) => {
                let _ = streams.notifications.send(e);
            }
            CategorizedEvent::Error(e) => {
                let refused = matches!(e, ErrorEvent::Connect { .. });
                warn!(message = %e.message(), "channel error event");
                let _ = streams.errors.send(e);
                if refused {
                    return Some(SessionEnd::Refused);
                }
            }
        }
        None
    }

    fn session_ended(&self, generation: u64, end: SessionEnd) {
        let mut session = self.lock();
        if session.generation != generation {
            return;
        }
        session.outbound = None;
        self.set_state(ConnectionState::Disconnected);
        drop(session);

        match end {
            SessionEnd::Requested => debug!("channel session closed locally"),
            SessionEnd::ClosedByPeer => info!("channel session closed by server"),
            SessionEnd::Refused => warn!("channel session refused by server"),
            SessionEnd::Failed(error) => {
                warn!(error = %error, "channel session failed");
                let _ = self.streams.errors.send(ErrorEvent::Transport { message: error.to_string() });
            }
        }
    }
}

/// Handle to the realtime channel. Cheap to clone; clones share one session.
pub struct RealtimeChannel<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for RealtimeChannel<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Transport> RealtimeChannel<T> {
    pub fn new(transport: T) -> Self {
        Self::with_capacity(transport, DEFAULT_STREAM_CAPACITY)
    }

    pub fn with_capacity(transport: T, capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                session: Mutex::new(Session::default()),
                state_tx,
                streams: Streams::new(capacity),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Open a session carrying `token`. No-op while connecting or connected.
    ///
    /// A failed attempt is reported on the error stream as well as returned.
    /// If `disconnect` is called while the attempt is in flight, the late
    /// session is closed instead of installed.
    pub async fn connect(&self, token: &AuthToken) -> Result<(), ClientError> {
        let generation = {
            let mut session = self.inner.lock();
            if self.inner.state() != ConnectionState::Disconnected {
                debug!(state = ?self.inner.state(), "connect ignored, session already active");
                return Ok(());
            }
            session.generation += 1;
            self.inner.set_state(ConnectionState::Connecting);
            session.generation
        };

        let mut connection = match self.inner.transport.open(token).await {
            Ok(connection) => connection,
            Err(error) => {
                let session = self.inner.lock();
                let current = session.generation == generation;
                if current {
                    self.inner.set_state(ConnectionState::Disconnected);
                }
                drop(session);
                if current {
                    warn!(error = %error, "channel connect failed");
                    let _ = self
                        .inner
                        .streams
                        .errors
                        .send(ErrorEvent::Transport { message: error.to_string() });
                } else {
                    debug!(error = %error, "superseded connect attempt failed");
                }
                return Err(error);
            }
        };

        let outbound_rx = {
            let mut session = self.inner.lock();
            if session.generation != generation {
                None
            } else {
                let (tx, rx) = mpsc::unbounded_channel();
                session.outbound = Some(tx);
                self.inner.set_state(ConnectionState::Connected);
                Some(rx)
            }
        };

        match outbound_rx {
            Some(rx) => {
                info!(generation, "channel connected");
                tokio::spawn(pump(self.inner.clone(), generation, connection, rx));
            }
            None => {
                debug!(generation, "discarding session opened after disconnect");
                connection.close().await;
            }
        }
        Ok(())
    }

    /// Close the session if any. Idempotent.
    pub fn disconnect(&self) {
        let mut session = self.inner.lock();
        session.generation += 1;
        // Dropping the sender makes the pump close the transport.
        let had_session = session.outbound.take().is_some();
        self.inner.set_state(ConnectionState::Disconnected);
        if had_session {
            info!("channel disconnected");
        }
    }

    // ── Streams ─────────────────────────────────────────────────────

    pub fn subscribe_messages(&self) -> broadcast::Receiver<MessageEvent> {
        self.inner.streams.messages.subscribe()
    }

    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.inner.streams.presence.subscribe()
    }

    pub fn subscribe_typing(&self) -> broadcast::Receiver<TypingEvent> {
        self.inner.streams.typing.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.streams.notifications.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.inner.streams.errors.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.streams.status.subscribe()
    }

    // ── Outbound ────────────────────────────────────────────────────

    fn emit(&self, event: ClientEvent) -> Result<(), ClientError> {
        let session = self.inner.lock();
        match &session.outbound {
            Some(tx) if self.inner.state() == ConnectionState::Connected => {
                tx.send(event).map_err(|_| ClientError::NotConnected)
            }
            _ => Err(ClientError::NotConnected),
        }
    }

    fn emit_or_drop(&self, event: ClientEvent) {
        let name = event.name();
        if self.emit(event).is_err() {
            debug!(event = name, "channel not connected, dropping emit");
        }
    }

    pub fn add_translation(&self, notice: TranslationNotice) {
        self.emit_or_drop(ClientEvent::TranslationAdded(notice));
    }

    pub fn validate_translation(&self, notice: TranslationNotice) {
        self.emit_or_drop(ClientEvent::TranslationValidated(notice));
    }

    pub fn vote_translation(&self, notice: TranslationNotice) {
        self.emit_or_drop(ClientEvent::TranslationVoted(notice));
    }

    pub fn join_word_room(&self, word_id: impl Into<String>) {
        self.emit_or_drop(ClientEvent::JoinWordRoom(WordRoomRef { word_id: word_id.into() }));
    }

    pub fn leave_word_room(&self, word_id: impl Into<String>) {
        self.emit_or_drop(ClientEvent::LeaveWordRoom(WordRoomRef { word_id: word_id.into() }));
    }
}

impl<T: Transport> ChannelLink for RealtimeChannel<T> {
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn send_message(&self, payload: SendMessagePayload) -> Result<(), ClientError> {
        self.emit(ClientEvent::SendMessage(payload))
    }

    fn join_conversation(&self, conversation_id: Uuid) {
        self.emit_or_drop(ClientEvent::JoinConversation(ConversationRef { conversation_id }));
    }

    fn leave_conversation(&self, conversation_id: Uuid) {
        self.emit_or_drop(ClientEvent::LeaveConversation(ConversationRef { conversation_id }));
    }

    fn start_typing(&self, conversation_id: Uuid) {
        self.emit_or_drop(ClientEvent::TypingStart(ConversationRef { conversation_id }));
    }

    fn stop_typing(&self, conversation_id: Uuid) {
        self.emit_or_drop(ClientEvent::TypingStop(ConversationRef { conversation_id }));
    }
}

/// Owns the transport connection for one session generation.
async fn pump<T: Transport>(
    inner: Arc<Inner<T>>,
    generation: u64,
    mut connection: T::Connection,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
) {
    let end = loop {
        tokio::select! {
            command = outbound.recv() => {
                let Some(event) = command else {
                    connection.close().await;
                    break SessionEnd::Requested;
                };
                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(error) => {
                        warn!(event = event.name(), error = %error, "failed to encode emit");
                        continue;
                    }
                };
                if let Err(error) = connection.send(frame).await {
                    break SessionEnd::Failed(error);
                }
            }
            inbound = connection.recv() => {
                match inbound {
                    Some(Ok(frame)) => {
                        if let Some(end) = inner.dispatch(frame) {
                            connection.close().await;
                            break end;
                        }
                    }
                    Some(Err(error)) => break SessionEnd::Failed(error),
                    None => break SessionEnd::ClosedByPeer,
                }
            }
        }
    };
    inner.session_ended(generation, end);
}
