// Consistent exit codes for the parlance CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error (including bad configuration)
//   11 = authentication error
//   13 = network error

use std::process;

use parlance_client::config::ConfigError;
use parlance_client::error::ClientError;

use crate::session::NotSignedIn;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Auth = 11,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(client_err) = cause.downcast_ref::<ClientError>() {
                return Self::from_client_error(client_err);
            }
            if cause.downcast_ref::<NotSignedIn>().is_some() {
                return Self::Auth;
            }
            if cause.downcast_ref::<ConfigError>().is_some() {
                return Self::Usage;
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut => {
                        Self::Network
                    }
                    _ => Self::Error,
                };
            }
        }
        Self::Error
    }

    pub fn from_client_error(err: &ClientError) -> Self {
        match err {
            ClientError::RefreshRejected(_) => Self::Auth,
            ClientError::Request { status: Some(401 | 403), .. } => Self::Auth,
            ClientError::Request { status: Some(400 | 422), .. } => Self::Usage,
            ClientError::Request { status: None, .. }
            | ClientError::RefreshTimeout { .. }
            | ClientError::RefreshAbandoned
            | ClientError::Transport(_)
            | ClientError::NotConnected => Self::Network,
            ClientError::Request { .. } | ClientError::Validation(_) => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
