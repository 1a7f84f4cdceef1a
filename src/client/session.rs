//! State shared by the client handle, pending calls and the dispatch loop.

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::{ClientMetrics, ConnectionState, RequestTracker, SubscriptionRegistry};

/// Correlation tables and lifecycle state for one client.
///
/// Contents are scoped to the current connection epoch. The state lives in
/// a [`watch`] channel so callers can await transitions.
#[derive(Debug)]
pub struct Session {
    pub(crate) tracker: RequestTracker,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) metrics: Arc<ClientMetrics>,
    state: watch::Sender<ConnectionState>,
}

impl Session {
    /// Creates a disconnected session.
    ///
    /// `subscription_buffer` bounds each subscriber queue; `None` means
    /// unbounded.
    #[must_use]
    pub fn new(subscription_buffer: Option<usize>) -> Self {
        let metrics = Arc::new(ClientMetrics::new());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            tracker: RequestTracker::new(),
            registry: SubscriptionRegistry::new(subscription_buffer, Arc::clone(&metrics)),
            metrics,
            state,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Moves to `next` if the lifecycle allows it from the current state.
    ///
    /// Returns the state that was current when the check ran.
    pub(crate) fn transition(&self, next: ConnectionState) -> Result<ConnectionState, ConnectionState> {
        let mut previous = ConnectionState::Disconnected;
        let moved = self.state.send_if_modified(|state| {
            previous = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::trace!(from = %previous, to = %next, "connection state changed");
            Ok(previous)
        } else {
            Err(previous)
        }
    }

    /// Ends `epoch`: fails every pending request, closes every
    /// subscription stream and returns to `Disconnected`.
    ///
    /// A no-op if `epoch` has already ended or a newer connection has
    /// started. Connection losses (anything but a caller-initiated close)
    /// are counted in the metrics. Returns `true` if the epoch was ended
    /// by this call.
    pub(crate) fn end_epoch(&self, epoch: u64, reason: &str) -> bool {
        let closing = self.state() == ConnectionState::Closing;
        let Some(failed) = self.tracker.close_epoch(epoch, reason) else {
            tracing::trace!(epoch, reason, "epoch already ended, ignoring");
            return false;
        };
        let closed = self.registry.teardown_all();

        if closing {
            tracing::info!(epoch, failed, closed, reason, "connection closed");
        } else {
            self.metrics.record_connection_loss();
            tracing::warn!(epoch, failed, closed, reason, "connection lost");
        }
        self.state.send_replace(ConnectionState::Disconnected);
        true
    }
}
