// REST collaborator for the messaging endpoints.
//
// `HttpMessagingApi` attaches the session's bearer token to every call. A
// 401 sends the caller through the refresh coordinator, so concurrent
// expired calls share one `POST /auth/refresh`, and the original request is
// retried once with the renewed token.

use std::future::Future;

use reqwest::{RequestBuilder, Response};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use parlance_common::protocol::rest::{
    self, extract_error_message, MessagePage, MessagesQuery, RefreshRequest, RefreshResponse,
    SendMessageRequest, UnreadCount,
};
use parlance_common::types::{AuthToken, ConversationSummary, Message};

use crate::auth::AuthSession;
use crate::error::ClientError;
use crate::refresh::RefreshCoordinator;

/// The messaging endpoints the reconciler and CLI consume.
pub trait MessagingApi: Send + Sync {
    fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> impl Future<Output = Result<Message, ClientError>> + Send;

    fn conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, ClientError>> + Send;

    fn messages(
        &self,
        conversation_id: Uuid,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<MessagePage, ClientError>> + Send;

    fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn unread_count(&self) -> impl Future<Output = Result<u64, ClientError>> + Send;
}

pub struct HttpMessagingApi {
    http: reqwest::Client,
    base_url: Url,
    session: AuthSession,
    refresher: RefreshCoordinator,
}

impl HttpMessagingApi {
    pub fn new(base_url: Url, session: AuthSession, refresher: RefreshCoordinator) -> Self {
        Self { http: reqwest::Client::new(), base_url, session, refresher }
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Run an authenticated request, renewing the credential once on 401.
    async fn execute<R, B>(&self, build: B) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
        B: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.session.current_token();
        match self.send_once(&build, token.as_ref()).await {
            Err(error) if error.is_unauthorized() => {
                debug!("request unauthorized, refreshing token");
                let token = self.refresh().await?;
                self.send_once(&build, Some(&token)).await
            }
            other => other,
        }
    }

    async fn send_once<R, B>(&self, build: &B, token: Option<&AuthToken>) -> Result<R, ClientError>
    where
        R: DeserializeOwned,
        B: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut request = build(&self.http);
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }
        read_json(request.send().await?).await
    }

    async fn refresh(&self) -> Result<AuthToken, ClientError> {
        let http = self.http.clone();
        let url = self.endpoint(rest::AUTH_REFRESH);
        let session = self.session.clone();

        self.refresher
            .coordinate_refresh(move || async move {
                let refresh_token = session
                    .refresh_token()
                    .ok_or_else(|| ClientError::RefreshRejected("no refresh token held".into()))?;
                let response = http.post(url).json(&RefreshRequest { refresh_token }).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ClientError::RefreshRejected(format!(
                        "refresh endpoint answered {}",
                        status.as_u16()
                    )));
                }
                let body: RefreshResponse = response.json().await.map_err(|e| {
                    ClientError::RefreshRejected(format!("malformed refresh response: {e}"))
                })?;
                let access = body
                    .access_token
                    .filter(|token| !token.trim().is_empty())
                    .ok_or_else(|| {
                        ClientError::Validation("refresh response has no accessToken".into())
                    })?;

                let token = AuthToken::new(access);
                session.accept_refreshed(token.clone(), body.refresh_token);
                Ok(token)
            })
            .await
    }
}

/// Decode a JSON body, turning non-2xx responses into `ClientError::Request`.
/// An empty success body decodes as JSON `null`.
async fn read_json<R: DeserializeOwned>(response: Response) -> Result<R, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        let message = extract_error_message(&body)
            .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));
        return Err(ClientError::request(Some(status.as_u16()), message));
    }

    let body: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
    serde_json::from_slice(body)
        .map_err(|e| ClientError::Validation(format!("unexpected response body: {e}")))
}

impl MessagingApi for HttpMessagingApi {
    async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ClientError> {
        let url = self.endpoint(rest::SEND_MESSAGE);
        self.execute(|http| http.post(&url).json(&request)).await
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let url = self.endpoint(rest::CONVERSATIONS);
        self.execute(|http| http.get(&url)).await
    }

    async fn messages(
        &self,
        conversation_id: Uuid,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, ClientError> {
        let url = self.endpoint(rest::MESSAGES);
        let query = MessagesQuery { conversation_id, page, limit };
        self.execute(|http| http.get(&url).query(&query)).await
    }

    async fn mark_conversation_read(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        let url = self.endpoint(&rest::mark_read_path(conversation_id));
        let _: IgnoredAny = self.execute(|http| http.patch(&url)).await?;
        Ok(())
    }

    async fn unread_count(&self) -> Result<u64, ClientError> {
        let url = self.endpoint(rest::UNREAD_COUNT);
        let unread: UnreadCount = self.execute(|http| http.get(&url)).await.inspect_err(|e| {
            warn!(error = %e, "unread count unavailable");
        })?;
        Ok(unread.count)
    }
}
