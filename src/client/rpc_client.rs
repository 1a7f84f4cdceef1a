//! Public client handle: connect, call, subscribe, unsubscribe, close.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use super::session::Session;
use crate::codec;
use crate::config::ClientConfig;
use crate::domain::{
    ConnectionState, MetricsSnapshot, Outcome, Reply, RequestId, Subscription, SubscriptionToken,
    Ticket,
};
use crate::error::ClientError;
use crate::transport::{Transport, TransportListener};

/// Unsubscribe method used when a token was not created by this client.
const FALLBACK_UNSUBSCRIBE_METHOD: &str = "eth_unsubscribe";

/// JSON-RPC client over one persistent connection.
///
/// Cheap to clone; all clones share the connection, the pending-request
/// table and the subscription registry.
///
/// Reconnecting is left to the caller: after the connection is lost the
/// client is `Disconnected` and [`RpcClient::connect`] starts a fresh
/// epoch with ids restarting at 1.
#[derive(Debug, Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    request_timeout: Option<Duration>,
    close_timeout: Duration,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Creates a disconnected client on top of `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                session: Arc::new(Session::new(config.subscription_buffer)),
                request_timeout: config.request_timeout,
                close_timeout: config.connect_timeout,
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.session.state()
    }

    /// Receiver that observes lifecycle changes, e.g. to drive a
    /// reconnect policy.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.session.watch_state()
    }

    /// Number of the current (or last) connection epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.session.tracker.epoch()
    }

    /// Current counter values.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.session.metrics.snapshot()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.session.tracker.len()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.inner.session.registry.len()
    }

    /// Opens the connection and starts a new epoch.
    ///
    /// Leftovers of the previous epoch are failed first, and request ids
    /// restart at 1. The client is `Connected` before the first transport
    /// event is routed, so a socket that closes right away ends the new
    /// epoch like any later loss.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidTransition`] unless the client is
    ///   `Disconnected`.
    /// - [`ClientError::ConnectFailed`] if the transport cannot connect, or
    ///   if [`RpcClient::close`] was called while connecting. The client
    ///   ends up `Disconnected`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let session = &self.inner.session;
        session
            .transition(ConnectionState::Connecting)
            .map_err(|from| ClientError::InvalidTransition {
                from,
                to: ConnectionState::Connecting,
            })?;

        let epoch = session.tracker.start_epoch();
        session.registry.teardown_all();

        let (listener, events) = TransportListener::channel();
        if let Err(err) = self.inner.transport.connect(listener).await {
            session.tracker.fail_all("connect failed");
            let _ = session.transition(ConnectionState::Disconnected);
            tracing::warn!(epoch, error = %err, "connect failed");
            return Err(match err {
                ClientError::ConnectFailed(_) => err,
                other => ClientError::ConnectFailed(other.to_string()),
            });
        }

        if let Err(current) = session.transition(ConnectionState::Connected) {
            if let Err(err) = self.inner.transport.close().await {
                tracing::debug!(epoch, error = %err, "close frame not sent");
            }
            session.end_epoch(epoch, "closed while connecting");
            tracing::info!(epoch, state = %current, "connect abandoned");
            return Err(ClientError::ConnectFailed(format!(
                "connection closed while connecting (state: {current})"
            )));
        }

        let dispatcher = Dispatcher::new(Arc::clone(session), events, epoch);
        let handle = tokio::spawn(dispatcher.run());
        let previous = self
            .inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        tracing::info!(epoch, "connected");
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Waits for the transport to acknowledge the close (bounded by the
    /// connect timeout). Every pending request then fails with
    /// [`ClientError::ConnectionLost`] and every subscription stream ends.
    /// Closing a disconnected client is a no-op.
    ///
    /// Closing while a connect is in progress makes that connect fail with
    /// [`ClientError::ConnectFailed`]. A close racing another close waits
    /// for the first one to finish instead of ending the epoch itself.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] if this call had to wait for
    /// another connect or close and the client was not `Disconnected`
    /// within the connect timeout.
    pub async fn close(&self) -> Result<(), ClientError> {
        let session = &self.inner.session;
        match session.transition(ConnectionState::Closing) {
            Ok(ConnectionState::Connected) => {}
            Ok(_) | Err(ConnectionState::Closing) => return self.wait_disconnected().await,
            Err(_) => return Ok(()),
        }
        // Stable while `Closing`: no connect can start a newer epoch.
        let epoch = session.tracker.epoch();

        if let Err(err) = self.inner.transport.close().await {
            tracing::warn!(epoch, error = %err, "close frame not sent");
        }

        let handle = self
            .inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle
            && tokio::time::timeout(self.inner.close_timeout, &mut handle)
                .await
                .is_err()
        {
            handle.abort();
            tracing::warn!(epoch, "close not acknowledged in time");
        }

        session.end_epoch(epoch, "closed by client");
        Ok(())
    }

    async fn wait_disconnected(&self) -> Result<(), ClientError> {
        let mut state = self.inner.session.watch_state();
        let waited = tokio::time::timeout(self.inner.close_timeout, async {
            state
                .wait_for(|state| *state == ConnectionState::Disconnected)
                .await
                .is_ok()
        })
        .await;
        match waited {
            Ok(_) => Ok(()),
            Err(_elapsed) => Err(ClientError::Timeout),
        }
    }

    /// Sends a request and returns a handle to its pending response.
    ///
    /// The handle uses the configured request timeout.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] unless the client is `Connected`.
    /// - [`ClientError::Codec`] or [`ClientError::Transport`] if the
    ///   request cannot be sent. Nothing stays pending in that case.
    pub async fn start_call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<PendingCall, ClientError> {
        self.send_request(method, params, None).await
    }

    /// Sends a request and waits for its result with the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// Fails with the typed error for whatever went wrong: not connected,
    /// transport, timeout, connection lost or the server's [`ClientError::Rpc`].
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.call_with_timeout(method, params, self.inner.request_timeout)
            .await
    }

    /// Like [`RpcClient::call`] with an explicit timeout (`None` waits
    /// indefinitely).
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let pending = self
            .send_request(method, params, None)
            .await?
            .with_timeout(timeout);
        match pending.wait().await? {
            Reply::Value(value) => Ok(value),
            Reply::Subscribed(sub) => Err(ClientError::UnexpectedResult(format!(
                "plain call produced subscription {}",
                sub.token()
            ))),
        }
    }

    /// Sends a subscribe request and returns the notification stream once
    /// the server answers with a token.
    ///
    /// # Errors
    ///
    /// As for [`RpcClient::call`], plus [`ClientError::AlreadySubscribed`]
    /// if the server reuses a live token and
    /// [`ClientError::UnexpectedResult`] if the result is not a string.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Subscription, ClientError> {
        let pending = self
            .send_request(method, params, Some(unsubscribe_method_for(method)))
            .await?;
        match pending.wait().await? {
            Reply::Subscribed(sub) => Ok(sub),
            Reply::Value(value) => Err(ClientError::UnexpectedResult(format!(
                "subscribe produced plain value {value}"
            ))),
        }
    }

    /// Cancels a subscription on the server and, on success, ends its
    /// local stream.
    ///
    /// Returns the server's answer. On `false` the local binding is kept.
    ///
    /// # Errors
    ///
    /// As for [`RpcClient::call`], plus [`ClientError::UnexpectedResult`]
    /// if the server does not answer with a boolean.
    pub async fn unsubscribe(&self, token: &SubscriptionToken) -> Result<bool, ClientError> {
        let registry = &self.inner.session.registry;
        let method = registry
            .unsubscribe_method(token)
            .unwrap_or_else(|| FALLBACK_UNSUBSCRIBE_METHOD.to_string());

        let answer = self
            .call(&method, vec![Value::String(token.as_str().to_string())])
            .await?;
        let Some(removed) = answer.as_bool() else {
            return Err(ClientError::UnexpectedResult(format!(
                "{method} returned {answer}"
            )));
        };
        if removed {
            registry.remove(token);
            tracing::debug!(%token, "unsubscribed");
        }
        Ok(removed)
    }

    async fn send_request(
        &self,
        method: &str,
        params: Vec<Value>,
        unsubscribe_method: Option<String>,
    ) -> Result<PendingCall, ClientError> {
        let session = &self.inner.session;
        let state = session.state();
        if !state.accepts_requests() {
            return Err(ClientError::NotConnected(state));
        }

        let (tx, rx) = oneshot::channel();
        let ticket = session.tracker.begin(method, tx)?;
        let subscribe = unsubscribe_method.is_some();
        // Dropping the handle on any early return below cancels the entry.
        let pending = PendingCall {
            session: Arc::clone(session),
            ticket,
            rx,
            subscribe,
            timeout: self.inner.request_timeout,
            finished: false,
        };
        if let Some(unsubscribe_method) = unsubscribe_method {
            session.registry.create_pending(ticket.id, unsubscribe_method);
        }

        let frame = codec::encode_request(ticket.id, method, &params)?;
        self.inner.transport.send(frame).await?;
        session.metrics.record_request_sent();
        tracing::debug!(request_id = %ticket.id, epoch = ticket.epoch, method, "request sent");
        Ok(pending)
    }
}

/// Handle to one in-flight request.
///
/// Dropping an unfinished handle cancels the request locally: the pending
/// entry is removed and no frame is sent upstream.
#[derive(Debug)]
pub struct PendingCall {
    session: Arc<Session>,
    ticket: Ticket,
    rx: oneshot::Receiver<Outcome>,
    subscribe: bool,
    timeout: Option<Duration>,
    finished: bool,
}

impl PendingCall {
    /// Request id on the wire.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.ticket.id
    }

    /// Epoch the request was sent in.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.ticket.epoch
    }

    /// Replaces the timeout applied by [`PendingCall::wait`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Waits for the response.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Timeout`] if the timeout expires first; the
    ///   pending entry is removed.
    /// - [`ClientError::ConnectionLost`] if the connection ends first.
    /// - [`ClientError::Rpc`] if the server answers with an error.
    pub async fn wait(mut self) -> Result<Reply, ClientError> {
        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    if self.session.tracker.fail(self.ticket, ClientError::Timeout) {
                        self.forget_subscribe();
                        tracing::debug!(request_id = %self.ticket.id, "request timed out");
                    }
                    (&mut self.rx).await
                }
            },
            None => (&mut self.rx).await,
        };
        self.finished = true;
        received.unwrap_or_else(|_| {
            Err(ClientError::ConnectionLost(
                "request dropped before completion".to_string(),
            ))
        })
    }

    /// Cancels the request locally. Nothing is sent upstream.
    pub fn cancel(self) {
        drop(self);
    }

    fn forget_subscribe(&self) {
        if self.subscribe {
            self.session.registry.discard_pending(self.ticket.id);
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.finished && self.session.tracker.cancel(self.ticket) {
            self.forget_subscribe();
            tracing::debug!(request_id = %self.ticket.id, "request cancelled");
        }
    }
}

/// Pairs a subscribe method with its unsubscribe method by namespace,
/// e.g. `eth_subscribe` with `eth_unsubscribe`.
fn unsubscribe_method_for(subscribe_method: &str) -> String {
    match subscribe_method.strip_suffix("_subscribe") {
        Some(namespace) => format!("{namespace}_unsubscribe"),
        None => FALLBACK_UNSUBSCRIBE_METHOD.to_string(),
    }
}
