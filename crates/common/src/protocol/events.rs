// Realtime channel event types.
//
// Every frame on the channel is a named event with a JSON payload:
// `{"event": "<name>", "data": {...}}`. Inbound frames are decoded into the
// closed `ServerEvent` set at the channel boundary and then split into
// per-category enums; anything that does not match is rejected there.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Message, MessageType};

/// Raw named event as carried by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl WireFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    #[error("malformed `{event}` payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

// ── Payloads ────────────────────────────────────────────────────────

/// Payload of an outbound `send_message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WordRoomRef {
    pub word_id: String,
}

/// Translation activity on a dictionary word. Only `wordId` is required;
/// the remaining fields are passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranslationNotice {
    pub word_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_id: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: Uuid,
    pub username: String,
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
}

// ── Client -> Server ────────────────────────────────────────────────

/// Events the client emits on the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    JoinConversation(ConversationRef),
    LeaveConversation(ConversationRef),
    TypingStart(ConversationRef),
    TypingStop(ConversationRef),
    TranslationAdded(TranslationNotice),
    TranslationValidated(TranslationNotice),
    TranslationVoted(TranslationNotice),
    JoinWordRoom(WordRoomRef),
    LeaveWordRoom(WordRoomRef),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send_message",
            Self::JoinConversation(_) => "join_conversation",
            Self::LeaveConversation(_) => "leave_conversation",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::TranslationAdded(_) => "translation_added",
            Self::TranslationValidated(_) => "translation_validated",
            Self::TranslationVoted(_) => "translation_voted",
            Self::JoinWordRoom(_) => "join_word_room",
            Self::LeaveWordRoom(_) => "leave_word_room",
        }
    }

    pub fn to_frame(&self) -> Result<WireFrame, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

// ── Server -> Client ────────────────────────────────────────────────

/// Every event the server may push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(Message),
    MessageSent(Message),
    UserOnline(PresenceNotice),
    UserOffline(PresenceNotice),
    UserTyping(TypingNotice),
    UserStoppedTyping(TypingNotice),
    TranslationAdded(TranslationNotice),
    TranslationValidated(TranslationNotice),
    TranslationVoted(TranslationNotice),
    Error(ErrorNotice),
    ConnectError(ErrorNotice),
}

/// Names accepted by [`ServerEvent::from_frame`].
pub const SERVER_EVENT_NAMES: &[&str] = &[
    "new_message",
    "message_sent",
    "user_online",
    "user_offline",
    "user_typing",
    "user_stopped_typing",
    "translation_added",
    "translation_validated",
    "translation_voted",
    "error",
    "connect_error",
];

impl ServerEvent {
    /// Validate a raw frame against the closed event set.
    pub fn from_frame(frame: WireFrame) -> Result<Self, EventDecodeError> {
        if !SERVER_EVENT_NAMES.contains(&frame.event.as_str()) {
            return Err(EventDecodeError::UnknownEvent(frame.event));
        }
        let event = frame.event.clone();
        let value = serde_json::to_value(&frame)
            .map_err(|source| EventDecodeError::Malformed { event: event.clone(), source })?;
        serde_json::from_value(value).map_err(|source| EventDecodeError::Malformed { event, source })
    }

    /// Route the event to its category.
    pub fn categorize(self) -> CategorizedEvent {
        match self {
            Self::NewMessage(m) => CategorizedEvent::Message(MessageEvent::New(m)),
            Self::MessageSent(m) => CategorizedEvent::Message(MessageEvent::Sent(m)),
            Self::UserOnline(p) => CategorizedEvent::Presence(PresenceEvent::Online(p)),
            Self::UserOffline(p) => CategorizedEvent::Presence(PresenceEvent::Offline(p)),
            Self::UserTyping(t) => CategorizedEvent::Typing(TypingEvent::Started(t)),
            Self::UserStoppedTyping(t) => CategorizedEvent::Typing(TypingEvent::Stopped(t)),
            Self::TranslationAdded(n) => {
                CategorizedEvent::Notification(NotificationEvent::TranslationAdded(n))
            }
            Self::TranslationValidated(n) => {
                CategorizedEvent::Notification(NotificationEvent::TranslationValidated(n))
            }
            Self::TranslationVoted(n) => {
                CategorizedEvent::Notification(NotificationEvent::TranslationVoted(n))
            }
            Self::Error(e) => CategorizedEvent::Error(ErrorEvent::Server { message: e.message }),
            Self::ConnectError(e) => {
                CategorizedEvent::Error(ErrorEvent::Connect { message: e.message })
            }
        }
    }
}

// ── Categories ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CategorizedEvent {
    Message(MessageEvent),
    Presence(PresenceEvent),
    Typing(TypingEvent),
    Notification(NotificationEvent),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    /// A message addressed to (or relayed to) this client.
    New(Message),
    /// Echo of a message this client sent over the channel.
    Sent(Message),
}

impl MessageEvent {
    pub fn message(&self) -> &Message {
        match self {
            Self::New(m) | Self::Sent(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::New(m) | Self::Sent(m) => m,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Online(PresenceNotice),
    Offline(PresenceNotice),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingEvent {
    Started(TypingNotice),
    Stopped(TypingNotice),
}

impl TypingEvent {
    pub fn notice(&self) -> &TypingNotice {
        match self {
            Self::Started(n) | Self::Stopped(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    TranslationAdded(TranslationNotice),
    TranslationValidated(TranslationNotice),
    TranslationVoted(TranslationNotice),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorEvent {
    /// `error` event pushed by the server.
    Server { message: String },
    /// `connect_error`: the handshake was refused.
    Connect { message: String },
    /// Transport failure observed locally.
    Transport { message: String },
}

impl ErrorEvent {
    pub fn message(&self) -> &str {
        match self {
            Self::Server { message } | Self::Connect { message } | Self::Transport { message } => {
                message
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_json() -> Value {
        json!({
            "id": "6f1f7c3e-8b55-4f39-9d4e-4d8a1f0b9a01",
            "conversationId": "0b7c2c1d-3d43-4f0a-b1a2-2f6c33d1e002",
            "sender": { "id": "a3c1d9f0-1d0e-4c56-8a4b-96b2f1a0c003", "username": "alice" },
            "receiver": { "id": "b4d2eaf1-2e1f-4d67-9b5c-a7c3a2b1d004", "username": "bob" },
            "content": "hi",
            "messageType": "text",
            "isRead": false,
            "isDeleted": false,
            "createdAt": "2026-03-01T12:00:00Z",
            "updatedAt": "2026-03-01T12:00:00Z"
        })
    }

    #[test]
    fn client_event_serializes_as_named_frame() {
        let conversation_id = Uuid::new_v4();
        let event = ClientEvent::JoinConversation(ConversationRef { conversation_id });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "join_conversation");
        assert_eq!(json["data"]["conversationId"], conversation_id.to_string());
        assert_eq!(event.name(), "join_conversation");
    }

    #[test]
    fn send_message_payload_uses_camel_case() {
        let receiver_id = Uuid::new_v4();
        let frame = ClientEvent::SendMessage(SendMessagePayload {
            receiver_id,
            content: "hello".into(),
            message_type: MessageType::WordShare,
            metadata: Some(json!({ "wordId": "w-1" })),
        })
        .to_frame()
        .unwrap();

        assert_eq!(frame.event, "send_message");
        assert_eq!(frame.data["receiverId"], receiver_id.to_string());
        assert_eq!(frame.data["messageType"], "word_share");
        assert_eq!(frame.data["metadata"]["wordId"], "w-1");
    }

    #[test]
    fn decodes_new_message_into_message_category() {
        let frame = WireFrame::new("new_message", message_json());
        let event = ServerEvent::from_frame(frame).expect("valid frame");

        match event.categorize() {
            CategorizedEvent::Message(MessageEvent::New(m)) => assert_eq!(m.content, "hi"),
            other => panic!("expected new message, got {other:?}"),
        }
    }

    #[test]
    fn decodes_typing_events() {
        let frame = WireFrame::new(
            "user_stopped_typing",
            json!({
                "userId": "a3c1d9f0-1d0e-4c56-8a4b-96b2f1a0c003",
                "username": "alice",
                "conversationId": "0b7c2c1d-3d43-4f0a-b1a2-2f6c33d1e002"
            }),
        );
        let event = ServerEvent::from_frame(frame).expect("valid frame");
        assert!(matches!(event.categorize(), CategorizedEvent::Typing(TypingEvent::Stopped(_))));
    }

    #[test]
    fn translation_notice_keeps_extra_fields() {
        let frame = WireFrame::new(
            "translation_voted",
            json!({ "wordId": "w-9", "translationId": "t-2", "votes": 4 }),
        );
        let event = ServerEvent::from_frame(frame).expect("valid frame");
        match event {
            ServerEvent::TranslationVoted(notice) => {
                assert_eq!(notice.word_id, "w-9");
                assert_eq!(notice.translation_id.as_deref(), Some("t-2"));
                assert_eq!(notice.details["votes"], 4);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event_name() {
        let err = ServerEvent::from_frame(WireFrame::new("self_destruct", json!({}))).unwrap_err();
        assert!(matches!(err, EventDecodeError::UnknownEvent(name) if name == "self_destruct"));
    }

    #[test]
    fn rejects_malformed_payload() {
        let frame = WireFrame::new("user_online", json!({ "username": "alice" }));
        let err = ServerEvent::from_frame(frame).unwrap_err();
        assert!(matches!(err, EventDecodeError::Malformed { ref event, .. } if event == "user_online"));
    }

    #[test]
    fn error_event_routes_to_error_category() {
        let frame = WireFrame::new("error", json!({ "message": "rate limited" }));
        let event = ServerEvent::from_frame(frame).unwrap();
        assert_eq!(
            event.categorize(),
            CategorizedEvent::Error(ErrorEvent::Server { message: "rate limited".into() })
        );
    }
}
