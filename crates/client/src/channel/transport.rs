// Bidirectional socket transport behind the realtime channel.
//
// `Transport` opens authenticated sessions and `TransportConnection` moves
// named JSON frames. The channel only talks to these traits, so tests can
// script a server with in-memory queues. `WsTransport` is the production
// implementation over tokio-tungstenite.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use parlance_common::protocol::events::WireFrame;
use parlance_common::types::AuthToken;

use crate::error::ClientError;

/// Opens transport sessions carrying a connection credential.
pub trait Transport: Send + Sync + 'static {
    type Connection: TransportConnection;

    fn open(
        &self,
        token: &AuthToken,
    ) -> impl Future<Output = Result<Self::Connection, ClientError>> + Send;
}

/// One live session.
pub trait TransportConnection: Send + 'static {
    fn send(&mut self, frame: WireFrame) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Next inbound frame. `None` means the peer closed the session cleanly.
    /// Must be cancel safe: the channel polls it inside `select!`.
    fn recv(&mut self) -> impl Future<Output = Option<Result<WireFrame, ClientError>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

// ── WebSocket implementation ────────────────────────────────────────

/// WebSocket transport: one JSON text frame per event, bearer credential
/// on the upgrade request.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WsTransport {
    type Connection = WsConnection;

    async fn open(&self, token: &AuthToken) -> Result<WsConnection, ClientError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Transport(format!("invalid channel url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| ClientError::Validation("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| ClientError::Transport(format!("websocket connect failed: {e}")))?;
        debug!(url = %self.url, "websocket session opened");
        Ok(WsConnection { stream })
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TransportConnection for WsConnection {
    async fn send(&mut self, frame: WireFrame) -> Result<(), ClientError> {
        let text = serde_json::to_string(&frame)
            .map_err(|e| ClientError::Transport(format!("failed to encode frame: {e}")))?;
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Transport(format!("websocket send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<WireFrame, ClientError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<WireFrame>(text.as_str()) {
                    Ok(frame) => return Some(Ok(frame)),
                    Err(error) => {
                        warn!(error = %error, "ignoring non-JSON websocket frame");
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(error) => {
                    return Some(Err(ClientError::Transport(format!(
                        "websocket receive failed: {error}"
                    ))))
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(error) = self.stream.close(None).await {
            debug!(error = %error, "websocket close did not complete cleanly");
        }
    }
}
