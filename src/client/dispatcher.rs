//! Inbound routing loop for one connection epoch.
//!
//! The [`Dispatcher`] is the only consumer of transport events for its
//! epoch. Frames are decoded and routed strictly in arrival order:
//! responses go to the request tracker (or become subscriptions), and
//! notifications go to the subscription registry. A close or error ends
//! the epoch.

use std::sync::Arc;

use serde_json::Value;

use super::session::Session;
use crate::codec::{self, Incoming, Notification, Response};
use crate::domain::{Reply, RequestId, SubscriptionToken};
use crate::error::{ClientError, RpcErrorObject};
use crate::transport::{TransportEvent, TransportEvents};

/// Routes every inbound event of one epoch.
#[derive(Debug)]
pub struct Dispatcher {
    session: Arc<Session>,
    events: TransportEvents,
    epoch: u64,
}

impl Dispatcher {
    /// Creates the dispatcher for `epoch`, taking ownership of its event
    /// stream.
    #[must_use]
    pub fn new(session: Arc<Session>, events: TransportEvents, epoch: u64) -> Self {
        Self {
            session,
            events,
            epoch,
        }
    }

    /// Processes events until the socket closes or fails, then ends the
    /// epoch.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                TransportEvent::Message(raw) => self.handle_frame(&raw),
                TransportEvent::Closed { code, reason } => {
                    self.session
                        .end_epoch(self.epoch, &format!("socket closed ({code}): {reason}"));
                    return;
                }
                TransportEvent::Error(err) => {
                    self.session
                        .end_epoch(self.epoch, &format!("socket error: {err}"));
                    return;
                }
            }
        }
        self.session
            .end_epoch(self.epoch, "transport released its listener");
    }

    /// Decodes and routes one text frame.
    ///
    /// Malformed frames are logged and dropped; they never affect other
    /// pending work.
    pub fn handle_frame(&self, raw: &str) {
        match codec::decode(raw) {
            Incoming::Response(response) => self.route_response(response),
            Incoming::Notification(notification) => self.route_notification(notification),
            Incoming::Malformed(reason) => {
                self.session.metrics.record_malformed_frame();
                tracing::warn!(epoch = self.epoch, %reason, "dropping malformed frame");
            }
        }
    }

    fn route_response(&self, Response { id, outcome }: Response) {
        if self.session.registry.is_pending(id) {
            self.complete_subscribe(id, outcome);
            return;
        }

        match self.session.tracker.resolve(id, outcome) {
            Ok(()) => self.session.metrics.record_response_matched(),
            Err(err) => self.record_stale(id, &err),
        }
    }

    fn complete_subscribe(&self, id: RequestId, outcome: Result<Value, RpcErrorObject>) {
        let Some(pending) = self.session.tracker.take(id) else {
            self.session.registry.discard_pending(id);
            self.record_stale(id, &ClientError::StaleResponse(id));
            return;
        };
        self.session.metrics.record_response_matched();

        let reply = self.activate(id, outcome);
        if let Err(Ok(Reply::Subscribed(unclaimed))) = pending.complete(reply) {
            self.session.registry.remove(unclaimed.token());
            tracing::debug!(
                request_id = %id,
                token = %unclaimed.token(),
                "subscriber left before activation, binding released"
            );
        }
    }

    fn activate(&self, id: RequestId, outcome: Result<Value, RpcErrorObject>) -> Result<Reply, ClientError> {
        let registry = &self.session.registry;
        match outcome {
            Ok(Value::String(token)) => registry
                .activate(id, SubscriptionToken::from(token))
                .map(Reply::Subscribed)
                .inspect_err(|err| {
                    tracing::warn!(epoch = self.epoch, request_id = %id, error = %err, "subscription rejected");
                }),
            Ok(other) => {
                registry.discard_pending(id);
                Err(ClientError::UnexpectedResult(format!(
                    "subscription token must be a string, got {other}"
                )))
            }
            Err(err) => {
                registry.discard_pending(id);
                Err(err.into())
            }
        }
    }

    fn route_notification(&self, notification: Notification) {
        let Notification {
            method,
            token,
            payload,
        } = notification;
        let delivery = self.session.registry.deliver(&token, payload);
        tracing::trace!(epoch = self.epoch, %method, %token, ?delivery, "notification routed");
    }

    fn record_stale(&self, id: RequestId, err: &ClientError) {
        self.session.metrics.record_stale_response();
        tracing::warn!(epoch = self.epoch, request_id = %id, error = %err, "discarding response");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;
    use crate::domain::{ConnectionState, Outcome, Subscription, Ticket};
    use crate::transport::TransportListener;

    fn connected_session() -> Arc<Session> {
        let session = Arc::new(Session::new(None));
        session.tracker.start_epoch();
        let _ = session.transition(ConnectionState::Connecting);
        let _ = session.transition(ConnectionState::Connected);
        session
    }

    fn dispatcher(session: &Arc<Session>) -> (Dispatcher, TransportListener) {
        let (listener, events) = TransportListener::channel();
        let epoch = session.tracker.epoch();
        (Dispatcher::new(Arc::clone(session), events, epoch), listener)
    }

    fn register(session: &Session, method: &str) -> (Ticket, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let Ok(ticket) = session.tracker.begin(method, tx) else {
            panic!("register failed");
        };
        (ticket, rx)
    }

    fn subscribe(session: &Session, dispatcher: &Dispatcher, token: &str) -> Subscription {
        let (ticket, mut rx) = register(session, "eth_subscribe");
        session.registry.create_pending(ticket.id, "eth_unsubscribe");
        dispatcher.handle_frame(
            &json!({"jsonrpc": "2.0", "id": ticket.id, "result": token}).to_string(),
        );
        let Ok(Ok(Reply::Subscribed(sub))) = rx.try_recv() else {
            panic!("expected subscription");
        };
        sub
    }

    #[test]
    fn plain_response_resolves_value() {
        let session = connected_session();
        let (dispatcher, _listener) = dispatcher(&session);
        let (ticket, mut rx) = register(&session, "eth_blockNumber");

        dispatcher.handle_frame(&format!(r#"{{"jsonrpc":"2.0","id":{},"result":"0x5"}}"#, ticket.id));

        let Ok(Ok(Reply::Value(value))) = rx.try_recv() else {
            panic!("expected value");
        };
        assert_eq!(value, json!("0x5"));
        assert_eq!(session.metrics.snapshot().responses_matched, 1);
    }

    #[test]
    fn subscribe_response_becomes_stream() {
        let session = connected_session();
        let (dispatcher, _listener) = dispatcher(&session);
        let mut sub = subscribe(&session, &dispatcher, "0xcd0c3e8af590364c09d0fa6a1210faf5");
        assert_eq!(sub.token().as_str(), "0xcd0c3e8af590364c09d0fa6a1210faf5");

        dispatcher.handle_frame(
            r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xcd0c3e8af590364c09d0fa6a1210faf5","result":"0xabc"}}"#,
        );
        assert_eq!(sub.try_recv(), Some(json!("0xabc")));
    }

    #[test]
    fn rejected_subscribe_clears_pending_marker() {
        let session = connected_session();
        let (dispatcher, _listener) = dispatcher(&session);
        let (ticket, mut rx) = register(&session, "eth_subscribe");
        session.registry.create_pending(ticket.id, "eth_unsubscribe");

        dispatcher.handle_frame(
            &json!({"jsonrpc": "2.0", "id": ticket.id, "error": {"code": -32602, "message": "invalid subscription kind"}})
                .to_string(),
        );

        let Ok(Err(ClientError::Rpc { code, .. })) = rx.try_recv() else {
            panic!("expected rpc error");
        };
        assert_eq!(code, -32602);
        assert!(!session.registry.is_pending(ticket.id));
    }

    #[test]
    fn non_string_token_is_unexpected() {
        let session = connected_session();
        let (dispatcher, _listener) = dispatcher(&session);
        let (ticket, mut rx) = register(&session, "eth_subscribe");
        session.registry.create_pending(ticket.id, "eth_unsubscribe");

        dispatcher.handle_frame(&json!({"jsonrpc": "2.0", "id": ticket.id, "result": 17}).to_string());

        let Ok(Err(ClientError::UnexpectedResult(_))) = rx.try_recv() else {
            panic!("expected unexpected result");
        };
        assert!(session.registry.is_empty());
    }

    #[test]
    fn duplicate_token_is_surfaced_to_second_caller() {
        let session = connected_session();
        let (dispatcher, _listener) = dispatcher(&session);
        let _first = subscribe(&session, &dispatcher, "0xsame");

        let (ticket, mut rx) = register(&session, "eth_subscribe");
        session.registry.create_pending(ticket.id, "eth_unsubscribe");
        dispatcher.handle_frame(&json!({"jsonrpc": "2.0", "id": ticket.id, "result": "0xsame"}).to_string());

        let Ok(Err(ClientError::AlreadySubscribed(token))) = rx.try_recv() else {
            panic!("expected already subscribed");
        };
        assert_eq!(token.as_str(), "0xsame");
        assert_eq!(session.registry.len(), 1);
    }

    #[test]
    fn stale_and_malformed_frames_are_contained() {
        let session = connected_session();
        let (dispatcher, _listener) = dispatcher(&session);
        let (ticket, mut rx) = register(&session, "eth_chainId");

        dispatcher.handle_frame(r#"{"jsonrpc":"2.0","id":999,"result":"0x1"}"#);
        dispatcher.handle_frame("{ this is not json");
        dispatcher.handle_frame(
            r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xunknown","result":{}}}"#,
        );

        let snap = session.metrics.snapshot();
        assert_eq!(snap.stale_responses, 1);
        assert_eq!(snap.malformed_frames, 1);
        assert_eq!(snap.orphan_notifications, 1);
        assert!(rx.try_recv().is_err());
        assert!(session.tracker.is_pending(ticket.id));
    }

    #[test]
    fn subscriber_gone_before_activation_releases_binding() {
        let session = connected_session();
        let (dispatcher, _listener) = dispatcher(&session);
        let (ticket, rx) = register(&session, "eth_subscribe");
        session.registry.create_pending(ticket.id, "eth_unsubscribe");
        drop(rx);

        dispatcher.handle_frame(&json!({"jsonrpc": "2.0", "id": ticket.id, "result": "0xlate"}).to_string());
        assert!(session.registry.is_empty());
    }

    #[tokio::test]
    async fn close_event_fails_pending_and_closes_streams() {
        let session = connected_session();
        let (dispatcher, listener) = dispatcher(&session);
        let mut sub = subscribe(&session, &dispatcher, "0xa");
        let (_ticket, rx) = register(&session, "eth_subscribe");

        listener.on_message(r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xa","result":1}}"#);
        listener.on_close(1006, "gone");
        dispatcher.run().await;

        let Ok(Err(ClientError::ConnectionLost(_))) = rx.await else {
            panic!("expected connection lost");
        };
        assert_eq!(sub.recv().await, Some(json!(1)));
        assert_eq!(sub.recv().await, None);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn error_event_ends_epoch() {
        let session = connected_session();
        let (dispatcher, listener) = dispatcher(&session);
        listener.on_error("connection reset by peer");
        dispatcher.run().await;

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.metrics.snapshot().connection_losses, 1);
    }
}
