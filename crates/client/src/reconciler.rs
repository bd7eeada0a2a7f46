// Conversation reconciliation: REST history plus live pushes, merged into
// one ordered, deduplicated message sequence.
//
// Messages are placed by their `(created_at, id)` key rather than by arrival
// order. A REST page that lands after a push for a newer message still slots
// its older messages in front of it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlance_common::protocol::events::{MessageEvent, SendMessagePayload};
use parlance_common::types::{ConversationSummary, Message, MessageType, UserRef};

use crate::api::MessagingApi;
use crate::channel::ChannelLink;
use crate::error::ClientError;

/// Local state of one conversation.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: Option<Uuid>,
    participants: Vec<UserRef>,
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
    last_activity: Option<DateTime<Utc>>,
    is_active: bool,
}

impl Conversation {
    /// `id` is `None` for a conversation created locally and not yet
    /// persisted by the server.
    pub fn new(id: Option<Uuid>, participants: Vec<UserRef>) -> Self {
        Self {
            id,
            participants,
            messages: Vec::new(),
            ids: HashSet::new(),
            last_activity: None,
            is_active: true,
        }
    }

    pub fn from_summary(summary: &ConversationSummary) -> Self {
        let mut conversation = Self::new(Some(summary.id), summary.participants.clone());
        conversation.last_activity = Some(summary.last_activity);
        conversation.is_active = summary.is_active;
        conversation
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn participants(&self) -> &[UserRef] {
        &self.participants
    }

    /// Messages sorted by `(created_at, id)`, unique by id.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Whether a pushed message belongs here.
    ///
    /// Two-party conversations match on the sender/receiver pair in either
    /// direction. Any other participant count falls back to the
    /// conversation id, which never matches before the id is known.
    pub fn accepts(&self, message: &Message) -> bool {
        match self.participants.as_slice() {
            [a, b] => message.is_between(a.id, b.id),
            _ => self.id == Some(message.conversation_id),
        }
    }

    /// Insert `message` at its ordering slot, or merge its read/deleted
    /// flags into the copy already held. Returns true if the sequence
    /// changed.
    pub fn upsert(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return match self.messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => existing.merge_flags(&message),
                None => false,
            };
        }

        let key = message.ordering_key();
        let slot = self.messages.partition_point(|m| m.ordering_key() <= key);
        match self.last_activity {
            Some(at) if at >= message.created_at => {}
            _ => self.last_activity = Some(message.created_at),
        }
        self.ids.insert(message.id);
        self.messages.insert(slot, message);
        true
    }

    /// Flag every unread message addressed to `user` as read.
    fn mark_read_for(&mut self, user: Uuid) -> bool {
        let mut changed = false;
        for message in self.messages.iter_mut().filter(|m| m.receiver.id == user && !m.is_read) {
            message.is_read = true;
            changed = true;
        }
        changed
    }

    fn counterpart(&self, me: Uuid) -> Option<&UserRef> {
        self.participants.iter().find(|p| p.id != me)
    }
}

/// Result of [`ConversationReconciler::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Emitted over the realtime channel. The message shows up in the
    /// sequence once the server echoes it back.
    Dispatched,
    /// Persisted over REST and already part of the sequence.
    Delivered(Message),
}

/// Keeps one [`Conversation`] in sync with its history endpoint and the
/// channel's message stream, and publishes the ordered sequence to a
/// `watch` view.
pub struct ConversationReconciler<A, L> {
    api: Arc<A>,
    link: L,
    me: UserRef,
    state: Mutex<Conversation>,
    view: watch::Sender<Vec<Message>>,
}

impl<A, L> ConversationReconciler<A, L>
where
    A: MessagingApi + 'static,
    L: ChannelLink + 'static,
{
    pub fn new(api: Arc<A>, link: L, me: UserRef, conversation: Conversation) -> Self {
        let (view, _) = watch::channel(conversation.messages.clone());
        Self { api, link, me, state: Mutex::new(conversation), view }
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, conversation: &Conversation) {
        self.view.send_replace(conversation.messages.clone());
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.lock().id
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Ordered sequence, republished after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.view.subscribe()
    }

    /// Fetch one history page and merge it.
    ///
    /// A conversation without an id has no server history: the fetch is
    /// skipped and the sequence stays as it is. After a successful fetch
    /// the conversation is marked read once; a failure there is logged
    /// and does not fail the load. Returns the number of messages added.
    pub async fn load(&self, page: u32, page_size: u32) -> Result<usize, ClientError> {
        let Some(conversation_id) = self.conversation_id() else {
            debug!("conversation not persisted yet, skipping history fetch");
            return Ok(0);
        };

        let fetched = self.api.messages(conversation_id, page, page_size).await?;
        let added = {
            let mut state = self.lock();
            let mut added = 0;
            let mut changed = false;
            for message in fetched.messages {
                let is_new = !state.ids.contains(&message.id);
                if state.upsert(message) {
                    changed = true;
                    added += usize::from(is_new);
                }
            }
            if changed {
                self.publish(&state);
            }
            added
        };
        debug!(conversation_id = %conversation_id, page, added, "history page merged");

        match self.api.mark_conversation_read(conversation_id).await {
            Ok(()) => {
                let mut state = self.lock();
                if state.mark_read_for(self.me.id) {
                    self.publish(&state);
                }
            }
            Err(error) => {
                warn!(conversation_id = %conversation_id, error = %error, "mark read failed");
            }
        }
        Ok(added)
    }

    /// Merge one pushed message. Returns true if the sequence changed.
    pub fn on_push(&self, message: Message) -> bool {
        let mut state = self.lock();
        if !state.accepts(&message) {
            return false;
        }
        let id = message.id;
        let changed = state.upsert(message);
        if changed {
            self.publish(&state);
        } else {
            debug!(message_id = %id, "duplicate push ignored");
        }
        changed
    }

    /// `new_message` and `message_sent` echoes reconcile the same way.
    pub fn apply(&self, event: MessageEvent) -> bool {
        self.on_push(event.into_message())
    }

    /// Send a message to the other participant.
    ///
    /// Goes over the realtime channel when the conversation is persisted
    /// and the channel is up, otherwise over REST. A REST send appends the
    /// returned message immediately; the first one also adopts the
    /// server-assigned conversation id and joins it on the channel.
    pub async fn send(
        &self,
        content: impl Into<String>,
        message_type: MessageType,
        metadata: Option<Value>,
    ) -> Result<SendOutcome, ClientError> {
        let (conversation_id, receiver_id) = {
            let state = self.lock();
            let receiver = state.counterpart(self.me.id).ok_or_else(|| {
                ClientError::Validation("conversation has no other participant".into())
            })?;
            (state.id, receiver.id)
        };
        let payload = SendMessagePayload {
            receiver_id,
            content: content.into(),
            message_type,
            metadata,
        };

        if conversation_id.is_some() && self.link.is_connected() {
            match self.link.send_message(payload.clone()) {
                Ok(()) => return Ok(SendOutcome::Dispatched),
                Err(ClientError::NotConnected) => {
                    debug!("channel dropped before send, falling back to REST");
                }
                Err(error) => return Err(error),
            }
        }

        let message = self.api.send_message(payload).await?;
        let adopted = {
            let mut state = self.lock();
            let adopted = state.id.is_none();
            if adopted {
                state.id = Some(message.conversation_id);
            }
            if state.upsert(message.clone()) {
                self.publish(&state);
            }
            adopted
        };
        if adopted {
            info!(conversation_id = %message.conversation_id, "conversation persisted");
            self.link.join_conversation(message.conversation_id);
        }
        Ok(SendOutcome::Delivered(message))
    }

    /// Join the conversation's channel room, if it has an id.
    pub fn join(&self) {
        if let Some(id) = self.conversation_id() {
            self.link.join_conversation(id);
        }
    }

    pub fn leave(&self) {
        if let Some(id) = self.conversation_id() {
            self.link.leave_conversation(id);
        }
    }

    /// Feed the channel's message stream into this reconciler until the
    /// stream closes.
    pub fn listen(self: &Arc<Self>, mut events: broadcast::Receiver<MessageEvent>) -> JoinHandle<()> {
        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        reconciler.apply(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "message stream lagged, pushes were lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
