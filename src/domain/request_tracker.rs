//! In-flight request bookkeeping for one connection.
//!
//! [`RequestTracker`] allocates request ids and owns the pending map. It is
//! shared between caller tasks (which register, cancel and time out
//! requests) and the dispatch loop (which resolves them), so every access
//! goes through one [`std::sync::Mutex`]. The lock is never held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;

use super::{RequestId, Subscription};
use crate::error::{ClientError, RpcErrorObject};

/// Successful outcome of a request.
#[derive(Debug)]
pub enum Reply {
    /// Plain call result.
    Value(Value),
    /// A subscribe call whose token was bound to a live stream.
    Subscribed(Subscription),
}

/// What a pending request resolves to.
pub type Outcome = Result<Reply, ClientError>;

/// Sending half handed to the tracker for one request.
pub type ResultHandler = oneshot::Sender<Outcome>;

/// Identifies one registration: the request id plus the epoch it belongs to.
///
/// Ids restart at 1 on every epoch, so operations that may run late
/// (timeouts, cancellation on drop) carry the epoch to avoid touching a
/// newer request that reuses the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Request id on the wire.
    pub id: RequestId,
    /// Connection epoch the request was registered in.
    pub epoch: u64,
}

/// A request waiting for its response.
#[derive(Debug)]
pub struct PendingRequest {
    id: RequestId,
    method: String,
    sent_at: DateTime<Utc>,
    handler: ResultHandler,
}

impl PendingRequest {
    /// Request id.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// RPC method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Time the request was registered.
    #[must_use]
    pub const fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Hands `outcome` to the waiting caller.
    ///
    /// # Errors
    ///
    /// Returns the outcome back if the caller stopped waiting.
    pub fn complete(self, outcome: Outcome) -> Result<(), Outcome> {
        let elapsed_ms = (Utc::now() - self.sent_at).num_milliseconds();
        tracing::trace!(
            request_id = %self.id,
            method = %self.method,
            elapsed_ms,
            ok = outcome.is_ok(),
            "request resolved"
        );
        self.handler.send(outcome)
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    epoch: u64,
    open: bool,
    last_id: u64,
    pending: HashMap<RequestId, PendingRequest>,
}

impl TrackerState {
    fn next_id(&mut self) -> RequestId {
        self.last_id = self.last_id.saturating_add(1);
        RequestId::new(self.last_id)
    }

    fn insert(
        &mut self,
        id: RequestId,
        method: String,
        handler: ResultHandler,
    ) -> Result<Ticket, ClientError> {
        if !self.open {
            return Err(ClientError::ConnectionLost(format!(
                "epoch {} is closed",
                self.epoch
            )));
        }
        if self.pending.contains_key(&id) {
            return Err(ClientError::DuplicateId(id));
        }
        self.pending.insert(
            id,
            PendingRequest {
                id,
                method,
                sent_at: Utc::now(),
                handler,
            },
        );
        Ok(Ticket {
            id,
            epoch: self.epoch,
        })
    }

    fn remove(&mut self, ticket: Ticket) -> Option<PendingRequest> {
        if ticket.epoch != self.epoch {
            return None;
        }
        self.pending.remove(&ticket.id)
    }
}

/// Allocates ids and tracks pending requests for the current epoch.
///
/// A tracker starts closed. [`RequestTracker::start_epoch`] opens it and
/// [`RequestTracker::fail_all`] closes it again, so nothing can register
/// between a connection ending and the next one starting.
#[derive(Debug, Default)]
pub struct RequestTracker {
    state: Mutex<TrackerState>,
}

impl RequestTracker {
    /// Creates an empty, closed tracker at epoch 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current epoch number.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Returns a fresh id, strictly greater than every id allocated in
    /// this epoch.
    #[must_use]
    pub fn allocate_id(&self) -> RequestId {
        self.lock().next_id()
    }

    /// Stores a pending entry for an already allocated id.
    ///
    /// # Errors
    ///
    /// - [`ClientError::DuplicateId`] if `id` is already pending.
    /// - [`ClientError::ConnectionLost`] if the epoch is closed.
    pub fn register(
        &self,
        id: RequestId,
        method: impl Into<String>,
        handler: ResultHandler,
    ) -> Result<Ticket, ClientError> {
        self.lock().insert(id, method.into(), handler)
    }

    /// Allocates an id and registers `handler` under it in one step.
    ///
    /// # Errors
    ///
    /// - [`ClientError::DuplicateId`] if the allocated id is still pending,
    ///   which only happens if the counter saturates.
    /// - [`ClientError::ConnectionLost`] if the epoch is closed.
    pub fn begin(
        &self,
        method: impl Into<String>,
        handler: ResultHandler,
    ) -> Result<Ticket, ClientError> {
        let mut state = self.lock();
        let id = state.next_id();
        state.insert(id, method.into(), handler)
    }

    /// Removes and returns the pending entry for `id`.
    #[must_use]
    pub fn take(&self, id: RequestId) -> Option<PendingRequest> {
        self.lock().pending.remove(&id)
    }

    /// Delivers a server response to the matching pending request.
    ///
    /// An error object is handed to the caller as [`ClientError::Rpc`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StaleResponse`] if no request with `id` is
    /// pending. Callers log and discard it.
    pub fn resolve(
        &self,
        id: RequestId,
        response: Result<Value, RpcErrorObject>,
    ) -> Result<(), ClientError> {
        let pending = self.take(id).ok_or(ClientError::StaleResponse(id))?;
        let outcome = response.map(Reply::Value).map_err(ClientError::from);
        if pending.complete(outcome).is_err() {
            tracing::debug!(request_id = %id, "caller stopped waiting before response arrived");
        }
        Ok(())
    }

    /// Resolves one pending request with `err`, if it is still pending in
    /// the ticket's epoch. Returns `true` if an entry was removed.
    pub fn fail(&self, ticket: Ticket, err: ClientError) -> bool {
        let removed = self.lock().remove(ticket);
        match removed {
            Some(pending) => {
                let _ = pending.complete(Err(err));
                true
            }
            None => false,
        }
    }

    /// Drops the pending entry without resolving it. Nothing is sent
    /// upstream. Returns `true` if an entry was removed.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        self.lock().remove(ticket).is_some()
    }

    /// Closes the epoch and resolves every pending request with
    /// [`ClientError::ConnectionLost`].
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock();
            state.open = false;
            state.pending.drain().map(|(_, pending)| pending).collect()
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending.complete(Err(ClientError::ConnectionLost(reason.to_string())));
        }
        if count > 0 {
            tracing::debug!(count, reason, "failed all pending requests");
        }
        count
    }

    /// Like [`RequestTracker::fail_all`], but only while `epoch` is the
    /// current, still open epoch.
    ///
    /// Returns `None` if `epoch` was already closed or superseded, so a
    /// late report from an old connection never touches a newer one.
    pub fn close_epoch(&self, epoch: u64, reason: &str) -> Option<usize> {
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock();
            if state.epoch != epoch || !state.open {
                return None;
            }
            state.open = false;
            state.pending.drain().map(|(_, pending)| pending).collect()
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending.complete(Err(ClientError::ConnectionLost(reason.to_string())));
        }
        Some(count)
    }

    /// Starts a new epoch: fails leftovers, restarts ids at 1 and opens
    /// the tracker for registration.
    ///
    /// Returns the new epoch number.
    pub fn start_epoch(&self) -> u64 {
        self.fail_all("superseded by a new connection");
        let mut state = self.lock();
        state.epoch = state.epoch.saturating_add(1);
        state.last_id = 0;
        state.open = true;
        state.epoch
    }

    /// Returns `true` while the current epoch accepts registrations.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Returns `true` if `id` is pending.
    #[must_use]
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.lock().pending.contains_key(&id)
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }
}
