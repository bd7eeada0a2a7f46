// `parlance send` — send one message.
//
// With `--conversation` the message goes over the realtime channel and the
// command waits for the server's echo; otherwise (or when the channel
// cannot connect) it goes over REST.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use parlance_client::config::ClientConfig;
use parlance_client::reconciler::{Conversation, ConversationReconciler, SendOutcome};
use parlance_common::types::{Message, MessageType, UserRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::output::{self, OutputFormat};
use crate::session::{block_on, Session};

const ECHO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Recipient user id.
    receiver: Uuid,

    /// Message text. For `--word`, the shared word.
    content: String,

    /// Existing conversation with the recipient.
    #[arg(long)]
    conversation: Option<Uuid>,

    /// Share a dictionary word instead of plain text.
    #[arg(long)]
    word: bool,

    /// Extra JSON metadata, e.g. '{"wordId":"w-1"}'.
    #[arg(long, value_parser = parse_json)]
    metadata: Option<Value>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Channel,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub delivery: Delivery,
    /// Absent when the channel accepted the message but no echo arrived.
    pub message: Option<Message>,
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}

pub fn run(args: SendArgs, config: ClientConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = Session::open(config).and_then(|session| block_on(send(session, args))?);

    match result {
        Ok(result) => {
            if result.message.is_none() {
                output::print_warning(
                    format,
                    "NO_ECHO",
                    "message was sent but the server did not confirm it in time",
                );
            }
            output::print_output(format, &result, format_human)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

async fn send(session: Session, args: SendArgs) -> anyhow::Result<SendResult> {
    let me = session.require_identity()?;
    let channel = session.channel()?;

    if args.conversation.is_some() {
        if let Some(token) = session.auth.current_token() {
            if let Err(error) = channel.connect(&token).await {
                warn!(error = %error, "realtime channel unavailable, sending over REST");
            }
        }
    }

    let conversation =
        Conversation::new(args.conversation, vec![me.clone(), UserRef::new(args.receiver, "")]);
    let reconciler = Arc::new(ConversationReconciler::new(
        session.api.clone(),
        channel.clone(),
        me.clone(),
        conversation,
    ));
    let listener = reconciler.listen(channel.subscribe_messages());
    let before: HashSet<Uuid> = reconciler.messages().iter().map(|m| m.id).collect();
    let mut view = reconciler.subscribe();

    let message_type = if args.word { MessageType::WordShare } else { MessageType::Text };
    let outcome = reconciler
        .send(args.content.clone(), message_type, args.metadata)
        .await
        .context("failed to send message");

    let result = match outcome {
        Ok(SendOutcome::Delivered(message)) => {
            Ok(SendResult { delivery: Delivery::Rest, message: Some(message) })
        }
        Ok(SendOutcome::Dispatched) => {
            let echo = timeout(ECHO_TIMEOUT, async {
                loop {
                    let found = find_echo(&view.borrow_and_update(), &before, me.id, &args.content);
                    if found.is_some() {
                        return found;
                    }
                    if view.changed().await.is_err() {
                        return None;
                    }
                }
            })
            .await
            .ok()
            .flatten();
            Ok(SendResult { delivery: Delivery::Channel, message: echo })
        }
        Err(e) => Err(e),
    };

    channel.disconnect();
    listener.abort();
    result
}

fn find_echo(
    messages: &[Message],
    before: &HashSet<Uuid>,
    me: Uuid,
    content: &str,
) -> Option<Message> {
    messages
        .iter()
        .find(|m| !before.contains(&m.id) && m.sender.id == me && m.content == content)
        .cloned()
}

fn format_human(result: &SendResult) -> String {
    let via = match result.delivery {
        Delivery::Channel => "realtime channel",
        Delivery::Rest => "REST",
    };
    match &result.message {
        Some(message) => format!(
            "Sent via {via} to {} (message {}, conversation {})",
            message.receiver.id, message.id, message.conversation_id
        ),
        None => format!("Dispatched via {via}; awaiting confirmation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(sender: Uuid, content: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::from_u128(0xc0),
            sender: UserRef::new(sender, "me"),
            receiver: UserRef::new(Uuid::from_u128(2), "bruno"),
            content: content.into(),
            message_type: MessageType::Text,
            metadata: None,
            is_read: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn echo_must_be_new_and_ours() {
        let me = Uuid::from_u128(1);
        let old = message(me, "hola");
        let theirs = message(Uuid::from_u128(2), "hola");
        let ours = message(me, "hola");
        let before: HashSet<Uuid> = [old.id].into();

        let messages = vec![old.clone(), theirs, ours.clone()];
        assert_eq!(find_echo(&messages, &before, me, "hola").map(|m| m.id), Some(ours.id));
        assert!(find_echo(&[old], &before, me, "hola").is_none());
    }

    #[test]
    fn metadata_must_be_json() {
        assert_eq!(parse_json(r#"{"wordId":"w-1"}"#).unwrap()["wordId"], "w-1");
        assert!(parse_json("{oops").unwrap_err().starts_with("invalid JSON"));
    }

    #[test]
    fn human_format_names_the_route() {
        let sent = message(Uuid::from_u128(1), "hola");
        let rest = SendResult { delivery: Delivery::Rest, message: Some(sent.clone()) };
        assert!(format_human(&rest).starts_with("Sent via REST"));
        assert!(format_human(&rest).contains(&sent.id.to_string()));

        let pending = SendResult { delivery: Delivery::Channel, message: None };
        assert_eq!(format_human(&pending), "Dispatched via realtime channel; awaiting confirmation");
    }

    #[test]
    fn json_format_tags_delivery() {
        let result = SendResult { delivery: Delivery::Channel, message: None };
        let mut buf = Vec::new();
        output::write_output(&mut buf, OutputFormat::Json, &result, format_human).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["delivery"], "channel");
        assert!(parsed["message"].is_null());
    }
}
