// Signed-in session shared by every command: configuration, credentials,
// the REST client and, on demand, the realtime channel.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use parlance_client::api::HttpMessagingApi;
use parlance_client::auth::AuthSession;
use parlance_client::channel::{RealtimeChannel, WsTransport};
use parlance_client::config::ClientConfig;
use parlance_client::refresh::RefreshCoordinator;
use parlance_common::types::{AuthToken, UserRef};
use uuid::Uuid;

/// A required credential or identity variable is not set.
#[derive(Debug)]
pub struct NotSignedIn(pub &'static str);

impl fmt::Display for NotSignedIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not signed in: {} is not set", self.0)
    }
}

impl std::error::Error for NotSignedIn {}

pub struct Session {
    pub config: ClientConfig,
    pub auth: AuthSession,
    pub api: Arc<HttpMessagingApi>,
    identified: bool,
}

impl Session {
    /// Validate the configuration and sign in with the credentials it
    /// carries. Without `PARLANCE_USER_ID` the session still works for
    /// REST reads under a placeholder identity.
    pub fn open(config: ClientConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let access = config
            .access_token
            .as_deref()
            .map(AuthToken::new)
            .filter(|token| !token.is_blank())
            .ok_or(NotSignedIn("PARLANCE_TOKEN"))?;

        let identity = config.identity();
        let identified = identity.is_some();
        let me = identity.unwrap_or_else(|| UserRef::new(Uuid::nil(), "me"));

        let auth = AuthSession::new();
        auth.login(me, access, config.refresh_token.clone());

        let refresher = RefreshCoordinator::new(config.refresh_timeout());
        let api = Arc::new(HttpMessagingApi::new(config.api_url()?, auth.clone(), refresher));
        Ok(Self { config, auth, api, identified })
    }

    pub fn me(&self) -> UserRef {
        self.auth.current_user().unwrap_or_else(|| UserRef::new(Uuid::nil(), "me"))
    }

    /// The signed-in user, for commands that act as them on the channel.
    pub fn require_identity(&self) -> anyhow::Result<UserRef> {
        if !self.identified {
            return Err(NotSignedIn("PARLANCE_USER_ID").into());
        }
        Ok(self.me())
    }

    /// A disconnected channel to the configured endpoint.
    pub fn channel(&self) -> anyhow::Result<RealtimeChannel<WsTransport>> {
        let url = self.config.ws_endpoint()?;
        Ok(RealtimeChannel::with_capacity(WsTransport::new(url), self.config.channel_capacity))
    }
}

/// Run a command future to completion on a fresh runtime.
pub fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>, user: Option<Uuid>) -> ClientConfig {
        ClientConfig {
            access_token: token.map(str::to_string),
            refresh_token: Some("r1".into()),
            user_id: user,
            username: Some("ana".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_token_is_not_signed_in() {
        let err = Session::open(config(None, None)).err().expect("no token");
        let missing = err.downcast_ref::<NotSignedIn>().expect("typed error");
        assert_eq!(missing.0, "PARLANCE_TOKEN");
    }

    #[test]
    fn blank_token_is_not_signed_in() {
        assert!(Session::open(config(Some("  "), None)).is_err());
    }

    #[test]
    fn invalid_url_fails_before_sign_in() {
        let mut cfg = config(Some("t"), None);
        cfg.api_base_url = "http://chat.example.com/api".into();
        let err = Session::open(cfg).err().expect("plaintext remote url");
        assert!(err.downcast_ref::<parlance_client::config::ConfigError>().is_some());
    }

    #[test]
    fn signs_in_with_configured_identity() {
        let id = Uuid::from_u128(7);
        let session = Session::open(config(Some("t"), Some(id))).unwrap();
        assert_eq!(session.auth.current_token(), Some(AuthToken::new("t")));
        assert_eq!(session.auth.refresh_token().as_deref(), Some("r1"));
        assert_eq!(session.require_identity().unwrap(), UserRef::new(id, "ana"));
    }

    #[test]
    fn anonymous_session_cannot_act_on_channel() {
        let session = Session::open(config(Some("t"), None)).unwrap();
        assert_eq!(session.me().id, Uuid::nil());
        let err = session.require_identity().unwrap_err();
        assert_eq!(err.downcast_ref::<NotSignedIn>().map(|e| e.0), Some("PARLANCE_USER_ID"));
    }

    #[test]
    fn block_on_runs_future() {
        assert_eq!(block_on(async { 41 + 1 }).unwrap(), 42);
    }
}
