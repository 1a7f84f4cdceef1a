//! Domain layer: identifiers, connection lifecycle, and the two correlation
//! tables.
//!
//! The [`RequestTracker`] owns in-flight requests keyed by [`RequestId`];
//! the [`SubscriptionRegistry`] owns live bindings keyed by
//! [`SubscriptionToken`]. Both are scoped to one connection epoch and are
//! emptied together when the connection ends.

pub mod connection_state;
pub mod metrics;
pub mod request_id;
pub mod request_tracker;
pub mod subscription;
pub mod subscription_registry;
pub mod subscription_token;

pub use connection_state::ConnectionState;
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use request_id::RequestId;
pub use request_tracker::{Outcome, PendingRequest, Reply, RequestTracker, ResultHandler, Ticket};
pub use subscription::Subscription;
pub use subscription_registry::{Delivery, SubscriptionRegistry};
pub use subscription_token::SubscriptionToken;
