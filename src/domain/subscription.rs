//! Consumer side of a live subscription.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{RequestId, SubscriptionToken};

/// Stream of notification payloads for one server-issued token.
///
/// Created by the [`super::SubscriptionRegistry`] when a subscribe response
/// arrives. Yields each notification's `params.result` in receipt order and
/// ends with `None` once the subscription is removed or the connection
/// closes.
#[derive(Debug)]
pub struct Subscription {
    token: SubscriptionToken,
    request_id: RequestId,
    receiver: NotificationReceiver,
}

impl Subscription {
    pub(crate) fn new(
        token: SubscriptionToken,
        request_id: RequestId,
        receiver: NotificationReceiver,
    ) -> Self {
        Self {
            token,
            request_id,
            receiver,
        }
    }

    /// Server-issued token this stream is bound to.
    #[must_use]
    pub const fn token(&self) -> &SubscriptionToken {
        &self.token
    }

    /// Id of the subscribe request that created the subscription.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Waits for the next notification payload.
    ///
    /// Returns `None` once the subscription has been torn down and every
    /// queued payload has been read.
    pub async fn recv(&mut self) -> Option<Value> {
        match &mut self.receiver {
            NotificationReceiver::Unbounded(rx) => rx.recv().await,
            NotificationReceiver::Bounded(rx) => rx.recv().await,
        }
    }

    /// Returns a queued payload without waiting.
    pub fn try_recv(&mut self) -> Option<Value> {
        match &mut self.receiver {
            NotificationReceiver::Unbounded(rx) => rx.try_recv().ok(),
            NotificationReceiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().receiver {
            NotificationReceiver::Unbounded(rx) => rx.poll_recv(cx),
            NotificationReceiver::Bounded(rx) => rx.poll_recv(cx),
        }
    }
}

/// Result of queueing one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Queued {
    Ok,
    Full,
    Closed,
}

#[derive(Debug)]
pub(crate) enum NotificationSender {
    Unbounded(mpsc::UnboundedSender<Value>),
    Bounded(mpsc::Sender<Value>),
}

#[derive(Debug)]
pub(crate) enum NotificationReceiver {
    Unbounded(mpsc::UnboundedReceiver<Value>),
    Bounded(mpsc::Receiver<Value>),
}

/// Creates the queue between the dispatch loop and one consumer.
///
/// `None` gives an unbounded queue: a consumer that never reads grows it
/// without limit. `Some(n)` caps it at `n` payloads and newer payloads are
/// dropped while it is full.
pub(crate) fn notification_channel(
    capacity: Option<usize>,
) -> (NotificationSender, NotificationReceiver) {
    match capacity {
        Some(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (
                NotificationSender::Bounded(tx),
                NotificationReceiver::Bounded(rx),
            )
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                NotificationSender::Unbounded(tx),
                NotificationReceiver::Unbounded(rx),
            )
        }
    }
}

impl NotificationSender {
    /// Queues `payload` without ever waiting on the consumer.
    pub(crate) fn try_send(&self, payload: Value) -> Queued {
        match self {
            Self::Unbounded(tx) => match tx.send(payload) {
                Ok(()) => Queued::Ok,
                Err(_) => Queued::Closed,
            },
            Self::Bounded(tx) => match tx.try_send(payload) {
                Ok(()) => Queued::Ok,
                Err(mpsc::error::TrySendError::Full(_)) => Queued::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Queued::Closed,
            },
        }
    }
}
