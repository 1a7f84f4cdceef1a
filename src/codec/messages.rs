//! JSON-RPC 2.0 envelope types.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{RequestId, SubscriptionToken};
use crate::error::RpcErrorObject;

/// Protocol version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outgoing request envelope.
///
/// Field order is the wire order:
/// `{"jsonrpc":"2.0","method":...,"params":[...],"id":N}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestEnvelope<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: &'a str,
    /// Positional parameters.
    pub params: &'a [Value],
    /// Correlation id.
    pub id: RequestId,
}

impl<'a> RequestEnvelope<'a> {
    /// Builds a request envelope.
    #[must_use]
    pub const fn new(id: RequestId, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id,
        }
    }
}

/// A decoded response to one of our requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered.
    pub id: RequestId,
    /// `result` on success, `error` otherwise.
    pub outcome: Result<Value, RpcErrorObject>,
}

/// A decoded server push for a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Notification method, `eth_subscription` for geth.
    pub method: String,
    /// Token of the subscription the payload belongs to.
    pub token: SubscriptionToken,
    /// `params.result`.
    pub payload: Value,
}

/// Tagged result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// The frame carries an id: it answers a request.
    Response(Response),
    /// No id but a subscription token: a push notification.
    Notification(Notification),
    /// Anything else. Carries the reason for logging.
    Malformed(String),
}

/// Wire shape shared by responses and notifications.
///
/// `result` uses a presence-tracking deserializer so `"result": null` is
/// kept apart from a missing field.
#[derive(Debug, Deserialize)]
pub(super) struct RawFrame {
    #[serde(default)]
    pub(super) jsonrpc: Option<String>,
    #[serde(default)]
    pub(super) id: Option<Value>,
    #[serde(default)]
    pub(super) method: Option<String>,
    #[serde(default)]
    pub(super) params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub(super) result: Option<Value>,
    #[serde(default)]
    pub(super) error: Option<RpcErrorObject>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
