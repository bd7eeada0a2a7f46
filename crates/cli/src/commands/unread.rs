// `parlance unread` — count unread messages across conversations.

use anyhow::Context;
use clap::Args;
use parlance_client::api::MessagingApi;
use parlance_client::config::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::output::{self, OutputFormat};
use crate::session::{block_on, Session};

#[derive(Debug, Args)]
pub struct UnreadArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadResult {
    pub unread: u64,
}

pub fn run(args: UnreadArgs, config: ClientConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = Session::open(config).and_then(|session| block_on(count(session))?);

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

async fn count(session: Session) -> anyhow::Result<UnreadResult> {
    let unread = session.api.unread_count().await.context("failed to count unread messages")?;
    Ok(UnreadResult { unread })
}

fn format_human(result: &UnreadResult) -> String {
    match result.unread {
        0 => "No unread messages.".into(),
        1 => "1 unread message".into(),
        n => format!("{n} unread messages"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_format_pluralizes() {
        assert_eq!(format_human(&UnreadResult { unread: 0 }), "No unread messages.");
        assert_eq!(format_human(&UnreadResult { unread: 1 }), "1 unread message");
        assert_eq!(format_human(&UnreadResult { unread: 12 }), "12 unread messages");
    }

    #[test]
    fn json_format_has_count() {
        let mut buf = Vec::new();
        output::write_output(&mut buf, OutputFormat::Json, &UnreadResult { unread: 3 }, format_human)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["unread"], 3);
    }
}
