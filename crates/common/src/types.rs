// Core chat types shared across all Parlance crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Bearer credential used for REST calls and the realtime channel handshake.
///
/// `Debug` output is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

impl From<&str> for AuthToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A user as referenced from messages, presence and typing events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserRef {
    pub id: Uuid,
    pub username: String,
}

impl UserRef {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self { id, username: username.into() }
    }
}

/// Kind of message content.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    /// A shared dictionary word; `metadata` carries the word reference.
    WordShare,
}

/// A direct message between two users.
///
/// Immutable once created except for `is_read` / `is_deleted`, which only
/// ever go from `false` to `true` (see [`Message::merge_flags`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: UserRef,
    pub receiver: UserRef,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Position key within a conversation: creation time, then id.
    pub fn ordering_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }

    /// Fold the monotonic flags of another copy of this message into `self`.
    /// Returns true if anything changed. Flags never go back to `false`.
    pub fn merge_flags(&mut self, other: &Message) -> bool {
        let mut changed = false;
        if other.is_read && !self.is_read {
            self.is_read = true;
            changed = true;
        }
        if other.is_deleted && !self.is_deleted {
            self.is_deleted = true;
            changed = true;
        }
        if changed && other.updated_at > self.updated_at {
            self.updated_at = other.updated_at;
        }
        changed
    }

    /// Whether this message travels between exactly these two users
    /// (in either direction).
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender.id == a && self.receiver.id == b)
            || (self.sender.id == b && self.receiver.id == a)
    }
}

/// Conversation listing entry returned by `GET /messaging/conversations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub participants: Vec<UserRef>,
    #[serde(default)]
    pub last_message: Option<Message>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}
