// Remote typing indicators, keyed by (conversation, user).

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use parlance_common::protocol::events::TypingEvent;

/// Default lifetime of an entry that is not refreshed.
pub const DEFAULT_EXPIRY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
struct TypingEntry {
    username: String,
    expires_at: Instant,
    /// Order in which the user started typing.
    since: u64,
}

#[derive(Debug)]
pub struct TypingRoster {
    me: Uuid,
    expiry: Duration,
    entries: HashMap<(Uuid, Uuid), TypingEntry>,
    next_seq: u64,
}

impl TypingRoster {
    /// `me` is the local user; their own echoed typing events are ignored.
    pub fn new(me: Uuid, expiry: Duration) -> Self {
        Self { me, expiry, entries: HashMap::new(), next_seq: 0 }
    }

    /// Apply one inbound typing event. Returns true if the roster changed.
    pub fn apply(&mut self, event: &TypingEvent, now: Instant) -> bool {
        let notice = event.notice();
        if notice.user_id == self.me {
            return false;
        }
        let key = (notice.conversation_id, notice.user_id);
        match event {
            TypingEvent::Started(_) => {
                let expires_at = now + self.expiry;
                match self.entries.get_mut(&key) {
                    Some(entry) => {
                        entry.expires_at = expires_at;
                        let renamed = entry.username != notice.username;
                        if renamed {
                            entry.username = notice.username.clone();
                        }
                        renamed
                    }
                    None => {
                        let since = self.next_seq;
                        self.next_seq += 1;
                        self.entries.insert(
                            key,
                            TypingEntry { username: notice.username.clone(), expires_at, since },
                        );
                        true
                    }
                }
            }
            TypingEvent::Stopped(_) => self.entries.remove(&key).is_some(),
        }
    }

    /// Drop every entry whose expiry has passed. Returns true if any went.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.entries.len() != before
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.expires_at).min()
    }

    /// Names typing in `conversation_id`, in the order they started,
    /// without repeats.
    pub fn display_names(&self, conversation_id: Uuid) -> Vec<String> {
        let mut typing: Vec<&TypingEntry> = self
            .entries
            .iter()
            .filter(|((conversation, _), _)| *conversation == conversation_id)
            .map(|(_, entry)| entry)
            .collect();
        typing.sort_by_key(|entry| entry.since);

        let mut names: Vec<String> = Vec::with_capacity(typing.len());
        for entry in typing {
            if !names.contains(&entry.username) {
                names.push(entry.username.clone());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
