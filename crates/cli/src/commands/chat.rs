// `parlance chat` — interactive conversation with one user.
//
// Each stdin line is sent as a message. The conversation view (history,
// own sends, pushes), the connection state and the peer's typing state are
// printed as they change. The room is joined on every connect. Ends on EOF
// or Ctrl-C.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use parlance_client::api::MessagingApi;
use parlance_client::auth::bind_channel;
use parlance_client::channel::{ChannelLink, ConnectionState};
use parlance_client::config::ClientConfig;
use parlance_client::error::ClientError;
use parlance_client::reconciler::{Conversation, ConversationReconciler, SendOutcome};
use parlance_client::typing::{TypingMonitor, TypingReporter};
use parlance_common::types::{ConversationSummary, Message, MessageType, UserRef};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::commands::listen::{emit, skipped, ListenLine};
use crate::output::{self, OutputFormat};
use crate::session::{block_on, Session};

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// User id of the other participant.
    peer: Uuid,

    /// Conversation id. Looked up from the conversation list when omitted.
    #[arg(long)]
    conversation: Option<Uuid>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: ChatArgs, config: ClientConfig) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result =
        Session::open(config).and_then(|session| block_on(chat(session, &args, format))?);

    if let Err(e) = &result {
        output::print_anyhow_error(format, e);
    }
    result
}

async fn chat(session: Session, args: &ChatArgs, format: OutputFormat) -> anyhow::Result<()> {
    let me = session.require_identity()?;
    let conversation = match args.conversation {
        Some(id) => Conversation::new(Some(id), vec![me.clone(), UserRef::new(args.peer, "")]),
        None => {
            let summaries =
                session.api.conversations().await.context("failed to list conversations")?;
            match find_direct(&summaries, me.id, args.peer) {
                Some(summary) => Conversation::from_summary(summary),
                None => {
                    debug!(peer = %args.peer, "no conversation yet, first send creates it");
                    Conversation::new(None, vec![me.clone(), UserRef::new(args.peer, "")])
                }
            }
        }
    };

    let channel = session.channel()?;
    let mut status = channel.subscribe_status();
    let monitor =
        TypingMonitor::spawn(channel.subscribe_typing(), me.id, session.config.typing.expiry());
    let reconciler = Arc::new(ConversationReconciler::new(
        session.api.clone(),
        channel.clone(),
        me,
        conversation,
    ));
    let listener = reconciler.listen(channel.subscribe_messages());
    let binding = bind_channel(channel.clone(), session.auth.clone());

    let mut view = reconciler.subscribe();
    let mut typing = monitor.subscribe();
    let mut printed = HashSet::new();

    if reconciler.conversation_id().is_some() {
        reconciler
            .load(1, session.config.page_size)
            .await
            .context("failed to load conversation history")?;
    }
    let typing_session = |id| start_typing_session(&channel, &monitor, id, &session.config);
    let mut reporter = reconciler.conversation_id().map(typing_session);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let outcome: anyhow::Result<()> = loop {
        tokio::select! {
            _ = &mut interrupt => break Ok(()),
            line = stdin.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                let content = line.trim();
                if content.is_empty() {
                    continue;
                }
                let sent = send_line(reconciler.as_ref(), &mut reporter, &typing_session, content);
                if let Err(error) = sent.await {
                    warn!(error = %error, "send failed");
                    let line = ListenLine::Error { source: "send", message: error.to_string() };
                    emit(format, &line)?;
                }
            }
            state = status.recv() => match state {
                Ok(state) => {
                    join_on_connect(state, reconciler.as_ref());
                    emit(format, &ListenLine::status(state))?;
                }
                Err(error) => skipped("status", error),
            },
            changed = view.changed() => {
                if changed.is_err() {
                    continue;
                }
                let fresh = unseen(&view.borrow_and_update(), &mut printed);
                for message in fresh {
                    emit(format, &ListenLine::Message { event: "message", message })?;
                }
            }
            changed = typing.changed() => {
                if changed.is_err() {
                    continue;
                }
                let names = typing.borrow_and_update().clone();
                if let Some(conversation_id) = reconciler.conversation_id() {
                    emit(format, &ListenLine::Typing { conversation_id, names })?;
                }
            }
        }
    };

    if let Some(reporter) = reporter {
        reporter.close().await;
    }
    reconciler.leave();
    listener.abort();
    binding.abort();
    channel.disconnect();
    outcome
}

/// Rooms belong to a socket, so every (re)connect joins again.
fn join_on_connect<A, L>(state: ConnectionState, reconciler: &ConversationReconciler<A, L>)
where
    A: MessagingApi + 'static,
    L: ChannelLink + 'static,
{
    if state == ConnectionState::Connected {
        reconciler.join();
    }
}

/// Send one stdin line with typing notices around it.
///
/// The first REST send assigns the conversation id and the reconciler joins
/// the new room itself; all that is left here is the typing reporter.
async fn send_line<A, L>(
    reconciler: &ConversationReconciler<A, L>,
    reporter: &mut Option<TypingReporter>,
    start: impl FnOnce(Uuid) -> TypingReporter,
    content: &str,
) -> Result<SendOutcome, ClientError>
where
    A: MessagingApi + 'static,
    L: ChannelLink + 'static,
{
    if let Some(reporter) = reporter.as_ref() {
        reporter.input(content);
    }
    let outcome = reconciler.send(content, MessageType::Text, None).await;
    if let Some(reporter) = reporter.as_ref() {
        reporter.input("");
    }
    if reporter.is_none() {
        *reporter = reconciler.conversation_id().map(start);
    }
    outcome
}

fn start_typing_session<L>(
    link: &L,
    monitor: &TypingMonitor,
    conversation_id: Uuid,
    config: &ClientConfig,
) -> TypingReporter
where
    L: ChannelLink + Clone + 'static,
{
    monitor.set_active(Some(conversation_id));
    TypingReporter::spawn(link.clone(), conversation_id, config.typing.emitter())
}

/// The two-person conversation between `me` and `peer`, if one exists.
fn find_direct(
    summaries: &[ConversationSummary],
    me: Uuid,
    peer: Uuid,
) -> Option<&ConversationSummary> {
    summaries.iter().find(|s| {
        s.participants.len() == 2
            && s.participants.iter().any(|p| p.id == me)
            && s.participants.iter().any(|p| p.id == peer)
    })
}

/// Messages not printed yet, in view order. Marks them printed.
fn unseen(messages: &[Message], printed: &mut HashSet<Uuid>) -> Vec<Message> {
    messages.iter().filter(|m| printed.insert(m.id)).cloned().collect()
}
