// Client error taxonomy.
//
// Errors are `Clone` because a single refresh outcome is handed to every
// caller waiting on the same round.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The credential refresh did not settle within its bound.
    #[error("token refresh timed out after {}ms", after.as_millis())]
    RefreshTimeout { after: Duration },

    /// The refresh endpoint denied the request or answered with garbage.
    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),

    /// The refresh round this caller was waiting on was discarded by a
    /// forced reset.
    #[error("token refresh abandoned by reset")]
    RefreshAbandoned,

    /// Connection or protocol failure on the realtime channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// A well-formed response is missing a required field.
    #[error("invalid response: {0}")]
    Validation(String),

    /// A REST call failed. `status` is absent when no response arrived.
    #[error("{message}")]
    Request { status: Option<u16>, message: String },

    /// An outbound emit needs a live channel and there is none.
    #[error("realtime channel is not connected")]
    NotConnected,
}

impl ClientError {
    pub fn request(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Request { status, message: message.into() }
    }

    /// HTTP 401: the credential has expired or was revoked.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Request { status: Some(401), .. })
    }

    /// Whether a UI should offer a retry for this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RefreshTimeout { .. }
            | Self::RefreshAbandoned
            | Self::Transport(_)
            | Self::NotConnected => true,
            Self::Request { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            Self::RefreshRejected(_) | Self::Validation(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        let status = error.status().map(|s| s.as_u16());
        Self::Request { status, message: error.to_string() }
    }
}
