// `parlance listen` — stream realtime events until interrupted.
//
// Every event becomes one output line: human text on a terminal, one JSON
// object per line otherwise.

use clap::Args;
use parlance_client::auth::bind_channel;
use parlance_client::channel::{ChannelLink, ConnectionState};
use parlance_client::config::ClientConfig;
use parlance_client::error::ClientError;
use parlance_client::typing::TypingMonitor;
use parlance_common::protocol::events::{ErrorEvent, MessageEvent, NotificationEvent, PresenceEvent};
use parlance_common::types::Message;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

use crate::commands::history::format_message;
use crate::output::{self, OutputFormat};
use crate::session::{block_on, Session};

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Join this conversation and show who is typing in it. Messages from
    /// other conversations are not shown.
    #[arg(long)]
    conversation: Option<Uuid>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListenLine {
    Status { state: &'static str },
    Message { event: &'static str, message: Message },
    Presence { online: bool, user_id: Uuid, username: String },
    Typing { conversation_id: Uuid, names: Vec<String> },
    Notification { event: &'static str, word_id: String },
    Error { source: &'static str, message: String },
}

impl ListenLine {
    pub(crate) fn status(state: ConnectionState) -> Self {
        let state = match state {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        Self::Status { state }
    }

    fn message(event: MessageEvent) -> Self {
        match event {
            MessageEvent::New(message) => Self::Message { event: "new_message", message },
            MessageEvent::Sent(message) => Self::Message { event: "message_sent", message },
        }
    }

    fn presence(event: PresenceEvent) -> Self {
        let (online, notice) = match event {
            PresenceEvent::Online(n) => (true, n),
            PresenceEvent::Offline(n) => (false, n),
        };
        Self::Presence { online, user_id: notice.user_id, username: notice.username }
    }

    fn notification(event: NotificationEvent) -> Self {
        let (event, notice) = match event {
            NotificationEvent::TranslationAdded(n) => ("translation_added", n),
            NotificationEvent::TranslationValidated(n) => ("translation_validated", n),
            NotificationEvent::TranslationVoted(n) => ("translation_voted", n),
        };
        Self::Notification { event, word_id: notice.word_id }
    }

    fn error(event: ErrorEvent) -> Self {
        let source = match &event {
            ErrorEvent::Server { .. } => "server",
            ErrorEvent::Connect { .. } => "connect",
            ErrorEvent::Transport { .. } => "transport",
        };
        Self::Error { source, message: event.message().to_string() }
    }
}

pub fn run(args: ListenArgs, config: ClientConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result =
        Session::open(config).and_then(|session| block_on(listen(session, &args, format))?);

    if let Err(e) = &result {
        output::print_anyhow_error(format, e);
    }
    result
}

async fn listen(session: Session, args: &ListenArgs, format: OutputFormat) -> anyhow::Result<()> {
    let channel = session.channel()?;
    let mut status = channel.subscribe_status();
    let mut messages = channel.subscribe_messages();
    let mut presence = channel.subscribe_presence();
    let mut notifications = channel.subscribe_notifications();
    let mut errors = channel.subscribe_errors();

    let monitor = TypingMonitor::spawn(
        channel.subscribe_typing(),
        session.me().id,
        session.config.typing.expiry(),
    );
    monitor.set_active(args.conversation);
    let mut typing = monitor.subscribe();

    let binding = bind_channel(channel.clone(), session.auth.clone());
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut connected_once = false;

    let outcome = loop {
        let line = tokio::select! {
            _ = &mut interrupt => break Ok(()),
            state = status.recv() => match state {
                Ok(state) => {
                    match state {
                        ConnectionState::Connected => {
                            connected_once = true;
                            if let Some(id) = args.conversation {
                                channel.join_conversation(id);
                            }
                        }
                        ConnectionState::Disconnected if connected_once => {
                            emit(format, &ListenLine::status(state))?;
                            break Ok(());
                        }
                        ConnectionState::Disconnected => {
                            break Err(ClientError::Transport(
                                "could not connect to the realtime channel".into(),
                            ));
                        }
                        ConnectionState::Connecting => {}
                    }
                    ListenLine::status(state)
                }
                Err(error) => { skipped("status", error); continue; }
            },
            event = messages.recv() => match event {
                Ok(event) if shown(args.conversation, event.message()) => ListenLine::message(event),
                Ok(_) => continue,
                Err(error) => { skipped("messages", error); continue; }
            },
            event = presence.recv() => match event {
                Ok(event) => ListenLine::presence(event),
                Err(error) => { skipped("presence", error); continue; }
            },
            event = notifications.recv() => match event {
                Ok(event) => ListenLine::notification(event),
                Err(error) => { skipped("notifications", error); continue; }
            },
            event = errors.recv() => match event {
                Ok(event) => ListenLine::error(event),
                Err(error) => { skipped("errors", error); continue; }
            },
            changed = typing.changed(), if args.conversation.is_some() => {
                if changed.is_err() {
                    continue;
                }
                let names = typing.borrow_and_update().clone();
                match args.conversation {
                    Some(conversation_id) => ListenLine::Typing { conversation_id, names },
                    None => continue,
                }
            }
        };
        emit(format, &line)?;
    };

    if let Some(id) = args.conversation {
        channel.leave_conversation(id);
    }
    binding.abort();
    channel.disconnect();
    outcome.map_err(Into::into)
}

fn shown(filter: Option<Uuid>, message: &Message) -> bool {
    match filter {
        Some(wanted) => wanted == message.conversation_id,
        None => true,
    }
}

pub(crate) fn skipped(stream: &'static str, error: RecvError) {
    if let RecvError::Lagged(count) = error {
        warn!(stream, skipped = count, "output fell behind, events were dropped");
    }
}

pub(crate) fn emit(format: OutputFormat, line: &ListenLine) -> std::io::Result<()> {
    output::print_output(format, line, format_human)
}

fn format_human(line: &ListenLine) -> String {
    match line {
        ListenLine::Status { state } => format!("-- {state}"),
        ListenLine::Message { message, .. } => format_message(message),
        ListenLine::Presence { online: true, username, .. } => format!("* {username} is online"),
        ListenLine::Presence { online: false, username, .. } => format!("* {username} went offline"),
        ListenLine::Typing { names, .. } => match names.as_slice() {
            [] => "* nobody is typing".into(),
            [one] => format!("* {one} is typing…"),
            many => format!("* {} are typing…", many.join(", ")),
        },
        ListenLine::Notification { event, word_id } => format!("* {event} on word {word_id}"),
        ListenLine::Error { source, message } => format!("! {source} error: {message}"),
    }
}
