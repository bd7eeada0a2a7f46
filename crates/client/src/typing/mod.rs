// Typing presence.
//
// `TypingReporter` turns local keystrokes into `typing_start`/`typing_stop`
// emits for one conversation. `TypingMonitor` folds the channel's typing
// stream into the list of names shown for the active conversation. Both
// run the pure state machines in `emitter` and `roster` on a task that
// sleeps until the next deadline.

pub mod emitter;
pub mod roster;

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;
use uuid::Uuid;

use parlance_common::protocol::events::TypingEvent;

use crate::channel::ChannelLink;

pub use emitter::{EmitterConfig, TypingEmitter, TypingSignal};
pub use roster::TypingRoster;

// ── Local side ──────────────────────────────────────────────────────

/// Reports local typing activity for one conversation.
///
/// Dropping the reporter (or calling [`close`](Self::close)) ends the
/// current burst with a stop.
pub struct TypingReporter {
    input: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl TypingReporter {
    pub fn spawn<L>(link: L, conversation_id: Uuid, config: EmitterConfig) -> Self
    where
        L: ChannelLink + 'static,
    {
        let (input, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(report(link, conversation_id, TypingEmitter::new(config), rx));
        Self { input, task }
    }

    /// The input box now holds `content`.
    pub fn input(&self, content: impl Into<String>) {
        let _ = self.input.send(content.into());
    }

    pub async fn close(self) {
        drop(self.input);
        let _ = self.task.await;
    }
}

fn emit<L: ChannelLink>(link: &L, conversation_id: Uuid, signal: TypingSignal) {
    match signal {
        TypingSignal::Start => link.start_typing(conversation_id),
        TypingSignal::Stop => link.stop_typing(conversation_id),
    }
}

async fn report<L: ChannelLink>(
    link: L,
    conversation_id: Uuid,
    mut emitter: TypingEmitter,
    mut input: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let deadline = emitter.next_deadline();
        tokio::select! {
            content = input.recv() => {
                let Some(content) = content else {
                    if let Some(signal) = emitter.finish() {
                        emit(&link, conversation_id, signal);
                    }
                    break;
                };
                if let Some(signal) = emitter.on_input(&content, Instant::now()) {
                    emit(&link, conversation_id, signal);
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(signal) = emitter.poll(Instant::now()) {
                    emit(&link, conversation_id, signal);
                }
            }
        }
    }
}

// ── Remote side ─────────────────────────────────────────────────────

/// Tracks who is typing and publishes the names for the active
/// conversation.
pub struct TypingMonitor {
    active: watch::Sender<Option<Uuid>>,
    names: watch::Receiver<Vec<String>>,
    task: JoinHandle<()>,
}

impl TypingMonitor {
    pub fn spawn(events: broadcast::Receiver<TypingEvent>, me: Uuid, expiry: Duration) -> Self {
        let (active, active_rx) = watch::channel(None);
        let (names_tx, names) = watch::channel(Vec::new());
        let task = tokio::spawn(monitor(events, TypingRoster::new(me, expiry), active_rx, names_tx));
        Self { active, names, task }
    }

    pub fn set_active(&self, conversation_id: Option<Uuid>) {
        self.active.send_replace(conversation_id);
    }

    pub fn display_names(&self) -> Vec<String> {
        self.names.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.names.clone()
    }
}

impl Drop for TypingMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn monitor(
    mut events: broadcast::Receiver<TypingEvent>,
    mut roster: TypingRoster,
    mut active: watch::Receiver<Option<Uuid>>,
    names: watch::Sender<Vec<String>>,
) {
    loop {
        let expiry = roster.next_expiry();
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    roster.apply(&event, Instant::now());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "typing stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = active.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_until(expiry.unwrap_or_else(Instant::now)), if expiry.is_some() => {
                roster.expire(Instant::now());
            }
        }

        let current = match *active.borrow_and_update() {
            Some(conversation_id) => roster.display_names(conversation_id),
            None => Vec::new(),
        };
        names.send_if_modified(|shown| {
            if *shown == current {
                return false;
            }
            *shown = current;
            true
        });
    }
}
