// In-memory auth session: current credentials plus the authenticated-user
// signal that drives the realtime channel.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parlance_common::types::{AuthToken, UserRef};

use crate::channel::{RealtimeChannel, Transport};

#[derive(Debug, Default)]
struct Credentials {
    access: Option<AuthToken>,
    refresh: Option<String>,
}

struct Inner {
    credentials: Mutex<Credentials>,
    user: watch::Sender<Option<UserRef>>,
}

/// Shared handle to the signed-in user and their tokens. Cheap to clone.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<Inner>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    pub fn new() -> Self {
        let (user, _) = watch::channel(None);
        Self { inner: Arc::new(Inner { credentials: Mutex::new(Credentials::default()), user }) }
    }

    fn lock(&self) -> MutexGuard<'_, Credentials> {
        self.inner.credentials.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_token(&self) -> Option<AuthToken> {
        self.lock().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh.clone()
    }

    pub fn current_user(&self) -> Option<UserRef> {
        self.inner.user.borrow().clone()
    }

    /// Emits every time a user signs in or out.
    pub fn watch_user(&self) -> watch::Receiver<Option<UserRef>> {
        self.inner.user.subscribe()
    }

    pub fn login(&self, user: UserRef, access: AuthToken, refresh: Option<String>) {
        {
            let mut credentials = self.lock();
            credentials.access = Some(access);
            credentials.refresh = refresh;
        }
        info!(user = %user.username, "signed in");
        self.inner.user.send_replace(Some(user));
    }

    pub fn logout(&self) {
        *self.lock() = Credentials::default();
        if self.inner.user.send_replace(None).is_some() {
            info!("signed out");
        }
    }

    /// Store a renewed access token. The refresh token is only replaced
    /// when the server rotated it.
    pub fn accept_refreshed(&self, access: AuthToken, refresh: Option<String>) {
        let mut credentials = self.lock();
        credentials.access = Some(access);
        if let Some(refresh) = refresh {
            credentials.refresh = Some(refresh);
        }
        debug!("access token refreshed");
    }
}

/// Keep `channel` connected exactly while `session` has a signed-in user.
///
/// Connect attempts run on their own task so a sign-out during a slow
/// handshake disconnects immediately. The returned task ends when the
/// session is dropped.
pub fn bind_channel<T: Transport>(channel: RealtimeChannel<T>, session: AuthSession) -> JoinHandle<()> {
    let mut users = session.watch_user();
    tokio::spawn(async move {
        loop {
            let signed_in = users.borrow_and_update().is_some();
            if signed_in {
                match session.current_token() {
                    Some(token) => {
                        let channel = channel.clone();
                        tokio::spawn(async move {
                            if let Err(error) = channel.connect(&token).await {
                                warn!(error = %error, "channel connect after sign-in failed");
                            }
                        });
                    }
                    None => warn!("user signed in without an access token"),
                }
            } else {
                channel.disconnect();
            }

            if users.changed().await.is_err() {
                break;
            }
        }
    })
}
