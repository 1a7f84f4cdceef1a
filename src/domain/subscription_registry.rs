//! Token-to-consumer bindings for one connection.
//!
//! [`SubscriptionRegistry`] tracks two things behind one lock:
//!
//! - subscribe requests that are in flight, keyed by request id, so the
//!   dispatcher knows a response must become a stream rather than a value;
//! - active bindings from server token to the consumer's queue.
//!
//! Delivery never waits on a consumer: queues are unbounded by default, or
//! bounded with newer payloads dropped when full.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::subscription::{NotificationSender, Queued, notification_channel};
use super::{ClientMetrics, RequestId, Subscription, SubscriptionToken};
use crate::error::ClientError;

/// What happened to one notification handed to [`SubscriptionRegistry::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued to the bound consumer.
    Delivered,
    /// No binding for the token.
    Orphan,
    /// The bounded consumer queue was full.
    Dropped,
    /// The consumer had gone away; the binding was removed.
    ConsumerGone,
}

#[derive(Debug)]
struct Binding {
    request_id: RequestId,
    unsubscribe_method: String,
    sender: NotificationSender,
}

#[derive(Debug, Default)]
struct RegistryState {
    in_flight: HashMap<RequestId, String>,
    active: HashMap<SubscriptionToken, Binding>,
}

/// Maps subscription tokens to live consumer queues.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    capacity: Option<usize>,
    metrics: Arc<ClientMetrics>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    ///
    /// `capacity` bounds each consumer queue; `None` means unbounded.
    #[must_use]
    pub fn new(capacity: Option<usize>, metrics: Arc<ClientMetrics>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            capacity,
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `request_id` as a subscribe call awaiting its token.
    ///
    /// `unsubscribe_method` is remembered for the binding so the client
    /// can tear it down later with the matching method.
    pub fn create_pending(&self, request_id: RequestId, unsubscribe_method: impl Into<String>) {
        self.lock()
            .in_flight
            .insert(request_id, unsubscribe_method.into());
    }

    /// Returns `true` if `request_id` is a subscribe call in flight.
    #[must_use]
    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.lock().in_flight.contains_key(&request_id)
    }

    /// Forgets an in-flight subscribe call (cancelled, timed out or
    /// rejected). Returns `true` if it was marked.
    pub fn discard_pending(&self, request_id: RequestId) -> bool {
        self.lock().in_flight.remove(&request_id).is_some()
    }

    /// Binds `token` to a new consumer for the in-flight subscribe call
    /// `request_id`, returning the consumer's stream.
    ///
    /// # Errors
    ///
    /// - [`ClientError::StaleResponse`] if `request_id` is not in flight.
    /// - [`ClientError::AlreadySubscribed`] if `token` is already bound.
    ///   The existing binding is left untouched.
    pub fn activate(
        &self,
        request_id: RequestId,
        token: SubscriptionToken,
    ) -> Result<Subscription, ClientError> {
        let mut state = self.lock();
        let unsubscribe_method = state
            .in_flight
            .remove(&request_id)
            .ok_or(ClientError::StaleResponse(request_id))?;
        if state.active.contains_key(&token) {
            return Err(ClientError::AlreadySubscribed(token));
        }

        let (sender, receiver) = notification_channel(self.capacity);
        state.active.insert(
            token.clone(),
            Binding {
                request_id,
                unsubscribe_method,
                sender,
            },
        );
        tracing::debug!(%token, %request_id, "subscription activated");
        Ok(Subscription::new(token, request_id, receiver))
    }

    /// Routes a notification payload to the consumer bound to `token`.
    ///
    /// Orphans (no binding) are counted and discarded; they are expected
    /// when a push races the subscribe response or follows an unsubscribe.
    pub fn deliver(&self, token: &SubscriptionToken, payload: Value) -> Delivery {
        let mut state = self.lock();
        let Some(binding) = state.active.get(token) else {
            self.metrics.record_orphan_notification();
            tracing::debug!(%token, "orphan notification discarded");
            return Delivery::Orphan;
        };

        let queued = binding.sender.try_send(payload);
        match queued {
            Queued::Ok => {
                self.metrics.record_notification_delivered();
                Delivery::Delivered
            }
            Queued::Full => {
                self.metrics.record_dropped_notification();
                tracing::warn!(%token, "subscriber queue full, notification dropped");
                Delivery::Dropped
            }
            Queued::Closed => {
                state.active.remove(token);
                tracing::debug!(%token, "subscriber dropped its stream, binding removed");
                Delivery::ConsumerGone
            }
        }
    }

    /// Detaches the consumer bound to `token`, ending its stream.
    ///
    /// Idempotent: returns `false` if nothing was bound.
    pub fn remove(&self, token: &SubscriptionToken) -> bool {
        self.lock().active.remove(token).is_some()
    }

    /// Removes every binding and in-flight marker, ending every stream.
    ///
    /// Returns the number of active subscriptions closed.
    pub fn teardown_all(&self) -> usize {
        let closed = {
            let mut state = self.lock();
            state.in_flight.clear();
            std::mem::take(&mut state.active)
        };
        let count = closed.len();
        if count > 0 {
            tracing::debug!(count, "tore down all subscriptions");
        }
        count
    }

    /// Unsubscribe method recorded for `token`.
    #[must_use]
    pub fn unsubscribe_method(&self, token: &SubscriptionToken) -> Option<String> {
        self.lock()
            .active
            .get(token)
            .map(|binding| binding.unsubscribe_method.clone())
    }

    /// Id of the subscribe request that created `token`'s binding.
    #[must_use]
    pub fn request_id_of(&self, token: &SubscriptionToken) -> Option<RequestId> {
        self.lock().active.get(token).map(|binding| binding.request_id)
    }

    /// Returns `true` if `token` is bound.
    #[must_use]
    pub fn contains(&self, token: &SubscriptionToken) -> bool {
        self.lock().active.contains_key(token)
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    /// Returns `true` if no subscription is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().active.is_empty()
    }
}
