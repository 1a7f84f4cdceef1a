//! Ethereum `eth_subscribe` helpers.
//!
//! Thin wrappers that build the `eth_subscribe` params for each
//! subscription kind a node supports and hand them to
//! [`RpcClient::subscribe`].

use std::fmt;
use std::str::FromStr;

use serde_json::{Value, json};

use crate::client::RpcClient;
use crate::domain::Subscription;
use crate::error::ClientError;

/// Subscribe method of the `eth` namespace.
pub const SUBSCRIBE_METHOD: &str = "eth_subscribe";

/// Unsubscribe method of the `eth` namespace.
pub const UNSUBSCRIBE_METHOD: &str = "eth_unsubscribe";

/// Method name the node uses for subscription notifications.
pub const NOTIFICATION_METHOD: &str = "eth_subscription";

/// Event stream a node can push over `eth_subscribe`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionKind {
    /// Every new block header.
    NewHeads,
    /// Logs matching a filter object (`address`, `topics`).
    Logs(Value),
    /// Hashes of transactions entering the pending pool.
    NewPendingTransactions,
    /// Sync start/stop and progress updates.
    Syncing,
}

impl SubscriptionKind {
    /// Name of the kind as the node spells it.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewHeads => "newHeads",
            Self::Logs(_) => "logs",
            Self::NewPendingTransactions => "newPendingTransactions",
            Self::Syncing => "syncing",
        }
    }

    /// Positional params for `eth_subscribe`.
    #[must_use]
    pub fn params(&self) -> Vec<Value> {
        let name = Value::String(self.name().to_string());
        match self {
            Self::Logs(filter) => vec![name, filter.clone()],
            _ => vec![name],
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a subscription kind name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subscription kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for SubscriptionKind {
    type Err = UnknownKind;

    /// Parses a kind name, ignoring case and underscores. `logs` parses to
    /// an empty filter (every log).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('_', "").to_ascii_lowercase();
        match normalized.as_str() {
            "newheads" => Ok(Self::NewHeads),
            "logs" => Ok(Self::Logs(json!({}))),
            "newpendingtransactions" => Ok(Self::NewPendingTransactions),
            "syncing" => Ok(Self::Syncing),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

impl RpcClient {
    /// Opens an `eth_subscribe` subscription of `kind`.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::subscribe`].
    pub async fn eth_subscribe(&self, kind: &SubscriptionKind) -> Result<Subscription, ClientError> {
        tracing::debug!(%kind, "opening eth subscription");
        self.subscribe(SUBSCRIBE_METHOD, kind.params()).await
    }

    /// Streams hashes of new pending transactions.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::subscribe`].
    pub async fn new_pending_transactions_notifications(
        &self,
    ) -> Result<Subscription, ClientError> {
        self.eth_subscribe(&SubscriptionKind::NewPendingTransactions)
            .await
    }

    /// Streams sync status changes.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::subscribe`].
    pub async fn syncing_status_notifications(&self) -> Result<Subscription, ClientError> {
        self.eth_subscribe(&SubscriptionKind::Syncing).await
    }

    /// Streams new block headers.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::subscribe`].
    pub async fn new_heads_notifications(&self) -> Result<Subscription, ClientError> {
        self.eth_subscribe(&SubscriptionKind::NewHeads).await
    }

    /// Streams logs matching `filter`.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::subscribe`].
    pub async fn logs_notifications(&self, filter: Value) -> Result<Subscription, ClientError> {
        self.eth_subscribe(&SubscriptionKind::Logs(filter)).await
    }
}
