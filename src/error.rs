//! Client error types with stable numeric codes.
//!
//! [`ClientError`] is the central error type for the client. Each variant
//! maps to a numeric code so callers (and log pipelines) can branch on the
//! failure category without matching on message strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ConnectionState, RequestId, SubscriptionToken};

/// Error object reported by the server inside a JSON-RPC response.
///
/// ```json
/// { "code": -32601, "message": "the method eth_foo does not exist" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Server-defined error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Client-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category              | Blast radius                |
/// |-----------|-----------------------|-----------------------------|
/// | 1000–1999 | Connection            | every pending request       |
/// | 2000–2999 | Request correlation   | one request                 |
/// | 3000–3999 | Subscription          | one subscription            |
/// | 4000–4999 | Codec                 | one frame                   |
/// | 5000      | Server-reported error | one request                 |
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport could not establish a connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The connection dropped while the request was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The operation requires a connected client.
    #[error("not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// The requested lifecycle change is not allowed from the current state.
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        /// State the client was in.
        from: ConnectionState,
        /// State that was requested.
        to: ConnectionState,
    },

    /// The transport rejected an outgoing frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller-supplied timeout expired before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// The caller cancelled the request before it resolved.
    #[error("request cancelled")]
    Cancelled,

    /// A response arrived for an id with no pending entry.
    #[error("stale response for request {0}")]
    StaleResponse(RequestId),

    /// An id was registered twice while pending.
    #[error("duplicate pending request id {0}")]
    DuplicateId(RequestId),

    /// The server issued a subscription token that is already bound.
    #[error("subscription {0} already registered")]
    AlreadySubscribed(SubscriptionToken),

    /// The server answered with a result of an unexpected shape.
    #[error("unexpected result: {0}")]
    UnexpectedResult(String),

    /// Encoding an outgoing envelope failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Error reported by the server in the response envelope.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Server-defined error code.
        code: i64,
        /// Human-readable error message.
        message: String,
        /// Optional structured error data.
        data: Option<Value>,
    },
}

impl ClientError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::ConnectFailed(_) => 1001,
            Self::ConnectionLost(_) => 1002,
            Self::NotConnected(_) => 1003,
            Self::Transport(_) => 1004,
            Self::InvalidTransition { .. } => 1005,
            Self::Timeout => 2001,
            Self::Cancelled => 2002,
            Self::StaleResponse(_) => 2003,
            Self::DuplicateId(_) => 2004,
            Self::AlreadySubscribed(_) => 3001,
            Self::UnexpectedResult(_) => 3002,
            Self::Codec(_) => 4001,
            Self::Rpc { .. } => 5000,
        }
    }

    /// Returns `true` for internal invariant violations.
    ///
    /// Everything else is either scoped to a single request or
    /// subscription, or recoverable by reconnecting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateId(_))
    }

    /// Returns `true` if the error was caused by the connection going away.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::ConnectionLost(_) | Self::NotConnected(_)
        )
    }
}

impl From<RpcErrorObject> for ClientError {
    fn from(err: RpcErrorObject) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
