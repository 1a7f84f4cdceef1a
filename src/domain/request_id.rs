//! Type-safe request identifier.
//!
//! [`RequestId`] is a newtype wrapper around `u64` so request identifiers
//! cannot be confused with other integers (epochs, counters, codes).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a JSON-RPC request on one connection epoch.
///
/// Allocated by the [`super::RequestTracker`] from a counter that starts at
/// 1 and is reset at the start of every epoch. Serialised as a bare JSON
/// integer in the `id` field of request and response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<RequestId> for u64 {
    fn from(id: RequestId) -> Self {
        id.0
    }
}
