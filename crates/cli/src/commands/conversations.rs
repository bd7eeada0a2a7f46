// `parlance conversations` — list conversations, most recent first.

use anyhow::Context;
use clap::Args;
use parlance_client::api::MessagingApi;
use parlance_client::config::ClientConfig;
use parlance_common::types::ConversationSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::{self, OutputFormat};
use crate::session::{block_on, Session};

const PREVIEW_CHARS: usize = 40;

#[derive(Debug, Args)]
pub struct ConversationsArgs {
    /// Include conversations the server marks inactive.
    #[arg(long)]
    all: bool,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationsResult {
    /// Used to name the other side of each conversation.
    pub me: Uuid,
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
}

pub fn run(args: ConversationsArgs, config: ClientConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = Session::open(config).and_then(|session| block_on(list(session, args.all))?);

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

async fn list(session: Session, include_inactive: bool) -> anyhow::Result<ConversationsResult> {
    let mut conversations =
        session.api.conversations().await.context("failed to list conversations")?;
    if !include_inactive {
        conversations.retain(|c| c.is_active);
    }
    conversations.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    Ok(ConversationsResult { me: session.me().id, conversations })
}

fn format_human(result: &ConversationsResult) -> String {
    if result.conversations.is_empty() {
        return "No conversations.".into();
    }

    let mut lines = vec![format!("{} conversation(s)", result.conversations.len())];
    for c in &result.conversations {
        let others: Vec<&str> = c
            .participants
            .iter()
            .filter(|p| p.id != result.me)
            .map(|p| p.username.as_str())
            .collect();
        let unread = if c.unread_count > 0 {
            format!(" [{} unread]", c.unread_count)
        } else {
            String::new()
        };
        lines.push(format!(
            "  {}  {}{}  {}",
            c.id,
            others.join(", "),
            unread,
            c.last_activity.format("%Y-%m-%d %H:%M")
        ));
        if let Some(last) = &c.last_message {
            lines.push(format!("      {}: {}", last.sender.username, preview(&last.content)));
        }
    }
    lines.join("\n")
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
