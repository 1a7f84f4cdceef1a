//! Transport adapter boundary.
//!
//! The core talks to the physical socket only through [`Transport`]. The
//! listener is handed over at connect time, so each connection epoch has
//! exactly one [`TransportListener`] and the dispatcher owns the receiving
//! end of it.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use memory::{MemoryPeer, MemoryTransport};
pub use ws::WsTransport;

use crate::error::ClientError;

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// The socket closed, with the close code and reason.
    Closed {
        /// WebSocket close code (1000 for a normal closure).
        code: u16,
        /// Close reason sent by the peer, possibly empty.
        reason: String,
    },
    /// The socket failed.
    Error(String),
}

/// Receiving end of a [`TransportListener`], owned by the dispatcher.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Callback side of the transport: adapters report socket activity here.
///
/// Backed by an unbounded channel so reporting never blocks the socket
/// reader. Reports after the dispatcher is gone are discarded.
#[derive(Debug, Clone)]
pub struct TransportListener {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportListener {
    /// Creates a listener and the event stream it feeds.
    #[must_use]
    pub fn channel() -> (Self, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reports an inbound text frame.
    pub fn on_message(&self, text: impl Into<String>) {
        let _ = self.tx.send(TransportEvent::Message(text.into()));
    }

    /// Reports that the socket closed.
    pub fn on_close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.tx.send(TransportEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    /// Reports a socket failure.
    pub fn on_error(&self, err: impl Into<String>) {
        let _ = self.tx.send(TransportEvent::Error(err.into()));
    }

    /// Returns `true` once the dispatcher has stopped listening.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Physical socket used by the client.
///
/// Implementations must report the end of every successful connection
/// through the listener (`on_close` or `on_error`), including after a
/// caller-initiated [`Transport::close`].
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Opens the socket and starts reporting to `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectFailed`] if the socket cannot be
    /// opened.
    async fn connect(&self, listener: TransportListener) -> Result<(), ClientError>;

    /// Sends one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the frame cannot be written.
    async fn send(&self, frame: String) -> Result<(), ClientError>;

    /// Starts closing the socket. The acknowledgement arrives as a
    /// [`TransportEvent::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the close frame cannot be
    /// written.
    async fn close(&self) -> Result<(), ClientError>;
}
