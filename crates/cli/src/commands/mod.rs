// CLI subcommand dispatch.

use clap::Subcommand;
use parlance_client::config::ClientConfig;

pub mod chat;
pub mod conversations;
pub mod history;
pub mod listen;
pub mod send;
pub mod unread;

#[derive(Subcommand)]
pub enum Command {
    /// List conversations with their latest activity
    Conversations(conversations::ConversationsArgs),
    /// Show the number of unread messages
    Unread(unread::UnreadArgs),
    /// Print one page of a conversation's history and mark it read
    History(history::HistoryArgs),
    /// Send one message
    Send(send::SendArgs),
    /// Stream realtime events until interrupted
    Listen(listen::ListenArgs),
    /// Interactive conversation: stdin lines are sent, replies and typing are shown
    Chat(chat::ChatArgs),
}

pub fn run(cmd: Command, config: ClientConfig) -> anyhow::Result<()> {
    match cmd {
        Command::Conversations(args) => conversations::run(args, config),
        Command::Unread(args) => unread::run(args, config),
        Command::History(args) => history::run(args, config),
        Command::Send(args) => send::run(args, config),
        Command::Listen(args) => listen::run(args, config),
        Command::Chat(args) => chat::run(args, config),
    }
}
