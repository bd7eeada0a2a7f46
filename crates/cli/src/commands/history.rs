// `parlance history` — one page of a conversation, oldest first.
//
// Loading through the reconciler also marks the conversation read.

use anyhow::Context;
use clap::Args;
use parlance_client::config::ClientConfig;
use parlance_client::reconciler::{Conversation, ConversationReconciler};
use parlance_common::types::{Message, MessageType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::{self, OutputFormat};
use crate::session::{block_on, Session};

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Conversation id.
    conversation: Uuid,

    /// Page number, starting at 1 for the most recent page.
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Messages per page (defaults to `page_size` from the config).
    #[arg(long)]
    limit: Option<u32>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResult {
    pub conversation_id: Uuid,
    pub page: u32,
    #[serde(default)]
    pub messages: Vec<Message>,
}

pub fn run(args: HistoryArgs, config: ClientConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = Session::open(config).and_then(|session| block_on(fetch(session, &args))?);

    match result {
        Ok(result) => {
            output::print_output(format, &result, format_human)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

async fn fetch(session: Session, args: &HistoryArgs) -> anyhow::Result<HistoryResult> {
    let limit = args.limit.unwrap_or(session.config.page_size);
    anyhow::ensure!(args.page > 0 && limit > 0, "page and limit must be positive");

    let me = session.me();
    let reconciler = ConversationReconciler::new(
        session.api.clone(),
        session.channel()?,
        me.clone(),
        Conversation::new(Some(args.conversation), vec![me]),
    );
    reconciler
        .load(args.page, limit)
        .await
        .with_context(|| format!("failed to load history of {}", args.conversation))?;

    Ok(HistoryResult {
        conversation_id: args.conversation,
        page: args.page,
        messages: reconciler.messages(),
    })
}

pub(crate) fn format_message(message: &Message) -> String {
    let body = match message.message_type {
        MessageType::Text => message.content.clone(),
        MessageType::WordShare => format!("[word] {}", message.content),
    };
    let body = if message.is_deleted { "(deleted)".to_string() } else { body };
    format!("{} {}: {}", message.created_at.format("%H:%M"), message.sender.username, body)
}

fn format_human(result: &HistoryResult) -> String {
    if result.messages.is_empty() {
        return format!("No messages on page {}.", result.page);
    }
    result.messages.iter().map(format_message).collect::<Vec<_>>().join("\n")
}
