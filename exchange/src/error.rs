//! Errors surfaced to the caller that owns an exchange.

use envelope::{ExchangeId, codes};

/// Failure of a connection operation or of a single exchange.
///
/// Every variant except [`RpcError::Remote`] is raised by the client itself
/// and reports [`codes::CLIENT_ERROR`] from [`RpcError::code`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// No transport is open.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while a transport is already open.
    #[error("already connected")]
    AlreadyConnected,

    /// The transport failed to open, or a frame write failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The exchange's deadline elapsed before a reply arrived.
    #[error("request timeout")]
    Timeout,

    /// The connection ended while the exchange was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The reply carried neither a usable `result` nor a usable `error`.
    #[error("invalid response")]
    InvalidResponse,

    /// The server reported a failure. Code and message pass through untouched.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The id counter wrapped onto an exchange that is still outstanding.
    #[error("exchange id {0} is still outstanding")]
    IdCollision(ExchangeId),

    /// The stream already delivered its end value.
    #[error("stream already finished")]
    StreamFinished,

    /// The call parameters could not be serialized.
    #[error("failed to encode params: {0}")]
    Encode(String),
}

impl RpcError {
    /// Wire-level error code: the server's code for remote errors, `-1` otherwise.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Remote { code, .. } => *code,
            _ => codes::CLIENT_ERROR,
        }
    }

    /// Grepable identifier for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotConnected => "E_NOT_CONNECTED",
            Self::AlreadyConnected => "E_ALREADY_CONNECTED",
            Self::Connection(_) => "E_CONNECTION",
            Self::Timeout => "E_TIMEOUT",
            Self::ConnectionClosed => "E_CONNECTION_CLOSED",
            Self::InvalidResponse => "E_INVALID_RESPONSE",
            Self::Remote { .. } => "E_REMOTE",
            Self::IdCollision(_) => "E_ID_COLLISION",
            Self::StreamFinished => "E_STREAM_FINISHED",
            Self::Encode(_) => "E_ENCODE",
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
