// REST endpoint paths and payloads for the messaging API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::Message;

// ── Messaging ──────────────────────────────────────────────────────
pub const SEND_MESSAGE: &str = "/messaging/send";
pub const CONVERSATIONS: &str = "/messaging/conversations";
pub const MESSAGES: &str = "/messaging/messages";
pub const UNREAD_COUNT: &str = "/messaging/unread-count";

// ── Auth ───────────────────────────────────────────────────────────
pub const AUTH_REFRESH: &str = "/auth/refresh";

/// `PATCH /messaging/conversations/{id}/read`
pub fn mark_read_path(conversation_id: Uuid) -> String {
    format!("{CONVERSATIONS}/{conversation_id}/read")
}

/// `POST /messaging/send` body. Same shape as the channel's `send_message`.
pub use super::events::SendMessagePayload as SendMessageRequest;

/// Query for `GET /messaging/messages`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub conversation_id: Uuid,
    pub page: u32,
    pub limit: u32,
}

/// One page of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Both fields optional on the wire: a response missing `accessToken`
/// is well-formed JSON but not a usable refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Best-effort human-readable message from an error response body.
///
/// Looks at `message` (a string, or the first string of an array of
/// validation messages), then `error`.
pub fn extract_error_message(body: &Value) -> Option<String> {
    let from_field = |field: &str| match body.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    };
    from_field("message").or_else(|| from_field("error"))
}
