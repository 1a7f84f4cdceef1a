//! Connection lifecycle states.

use std::fmt;

use serde::Serialize;

/// State of the single connection owned by a client.
///
/// ```text
/// Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
/// Connecting   ──fail───────▶ Disconnected
/// Connected    ──onClose / onError──▶ Disconnected
/// Connecting | Connected ──close()──▶ Closing ──ack──▶ Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket. Requests are rejected.
    Disconnected,
    /// The transport is opening the socket.
    Connecting,
    /// Requests and notifications flow.
    Connected,
    /// A caller-initiated close is waiting for the socket to acknowledge.
    Closing,
}

impl ConnectionState {
    /// Returns `true` if the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Closing | Self::Disconnected)
                | (Self::Connected, Self::Closing | Self::Disconnected)
                | (Self::Closing, Self::Disconnected)
        )
    }

    /// Returns `true` if new requests may be sent in this state.
    #[must_use]
    pub const fn accepts_requests(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}
