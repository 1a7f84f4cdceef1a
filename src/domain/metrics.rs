//! Lock-free counters for correlation and dispatch outcomes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by the request tracker, the subscription registry and
/// the dispatcher.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    requests_sent: AtomicU64,
    responses_matched: AtomicU64,
    stale_responses: AtomicU64,
    notifications_delivered: AtomicU64,
    orphan_notifications: AtomicU64,
    dropped_notifications: AtomicU64,
    malformed_frames: AtomicU64,
    connection_losses: AtomicU64,
}

/// Point-in-time copy of [`ClientMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Request frames handed to the transport.
    pub requests_sent: u64,
    /// Responses that resolved a pending request.
    pub responses_matched: u64,
    /// Responses with no pending request.
    pub stale_responses: u64,
    /// Notifications queued to a subscriber.
    pub notifications_delivered: u64,
    /// Notifications whose token had no active subscription.
    pub orphan_notifications: u64,
    /// Notifications dropped because a bounded subscriber queue was full.
    pub dropped_notifications: u64,
    /// Inbound frames that could not be decoded.
    pub malformed_frames: u64,
    /// Connection epochs that ended without a caller-initiated close.
    pub connection_losses: u64,
}

impl ClientMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_response_matched(&self) {
        self.responses_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_response(&self) {
        self.stale_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_notification_delivered(&self) {
        self.notifications_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_orphan_notification(&self) {
        self.orphan_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_notification(&self) {
        self.dropped_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_loss(&self) {
        self.connection_losses.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            orphan_notifications: self.orphan_notifications.load(Ordering::Relaxed),
            dropped_notifications: self.dropped_notifications.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            connection_losses: self.connection_losses.load(Ordering::Relaxed),
        }
    }
}
