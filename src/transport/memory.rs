//! In-process loopback transport.
//!
//! [`MemoryTransport`] plays the client side of the socket; its
//! [`MemoryPeer`] plays the server: it sees every frame the client sends
//! and can inject messages, closes and errors. Used to drive the client
//! without a network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, TransportListener};
use crate::error::ClientError;

#[derive(Debug, Default)]
struct MemoryState {
    listener: Option<TransportListener>,
    refuse_connect: bool,
    connects: usize,
}

type SharedState = Arc<Mutex<MemoryState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client half of an in-memory connection.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: SharedState,
    sent: mpsc::UnboundedSender<String>,
}

/// Server half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    state: SharedState,
    sent: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Creates a connected pair of transport and peer.
    #[must_use]
    pub fn pair() -> (Self, MemoryPeer) {
        let state = SharedState::default();
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::clone(&state),
                sent: tx,
            },
            MemoryPeer { state, sent: rx },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, listener: TransportListener) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        if state.refuse_connect {
            return Err(ClientError::ConnectFailed("connection refused".to_string()));
        }
        state.listener = Some(listener);
        state.connects += 1;
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), ClientError> {
        if lock(&self.state).listener.is_none() {
            return Err(ClientError::Transport("socket is not open".to_string()));
        }
        self.sent
            .send(frame)
            .map_err(|_| ClientError::Transport("peer is gone".to_string()))
    }

    async fn close(&self) -> Result<(), ClientError> {
        let listener = lock(&self.state).listener.take();
        if let Some(listener) = listener {
            listener.on_close(1000, "normal closure");
        }
        Ok(())
    }
}

impl MemoryPeer {
    /// Waits for the next frame the client sends.
    ///
    /// Returns `None` once the transport and all its clones are dropped.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Returns the next sent frame if one is already queued.
    pub fn try_next_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    /// Injects an inbound text frame. Returns `false` if no socket is open.
    pub fn push(&self, text: impl Into<String>) -> bool {
        match lock(&self.state).listener.as_ref() {
            Some(listener) => {
                listener.on_message(text);
                true
            }
            None => false,
        }
    }

    /// Closes the socket from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        if let Some(listener) = lock(&self.state).listener.take() {
            listener.on_close(code, reason);
        }
    }

    /// Fails the socket.
    pub fn fail(&self, err: &str) {
        if let Some(listener) = lock(&self.state).listener.take() {
            listener.on_error(err);
        }
    }

    /// Makes later connect attempts fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.state).refuse_connect = refuse;
    }

    /// Returns `true` while a socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.state).listener.is_some()
    }

    /// Number of successful connects so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }
}
