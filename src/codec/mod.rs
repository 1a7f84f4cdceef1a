//! Message codec: request encoding and tagged decoding of inbound frames.
//!
//! Decoding classifies a frame once, up front, into [`Incoming`]. Routing
//! code matches on the tag and never probes JSON fields itself:
//!
//! - a non-null top-level `id` makes a [`Response`];
//! - no `id` but `params.subscription` makes a [`Notification`];
//! - everything else is [`Incoming::Malformed`].

pub mod messages;

use serde_json::Value;

pub use messages::{Incoming, JSONRPC_VERSION, Notification, RequestEnvelope, Response};

use crate::domain::{RequestId, SubscriptionToken};
use crate::error::ClientError;
use messages::RawFrame;

/// Serialises a request envelope to its wire text.
///
/// # Errors
///
/// Returns [`ClientError::Codec`] if a parameter cannot be serialised.
pub fn encode_request(id: RequestId, method: &str, params: &[Value]) -> Result<String, ClientError> {
    Ok(serde_json::to_string(&RequestEnvelope::new(id, method, params))?)
}

/// Decodes one inbound text frame.
///
/// Never fails: frames that are not a recognisable response or
/// notification come back as [`Incoming::Malformed`].
#[must_use]
pub fn decode(raw: &str) -> Incoming {
    let mut frame: RawFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(err) => return Incoming::Malformed(format!("invalid json-rpc frame: {err}")),
    };

    if let Some(version) = frame.jsonrpc.as_deref()
        && version != JSONRPC_VERSION
    {
        return Incoming::Malformed(format!("unsupported jsonrpc version {version:?}"));
    }

    match frame.id.take() {
        Some(Value::Null) | None => decode_notification(frame),
        Some(id) => decode_response(&id, frame),
    }
}

fn decode_response(id: &Value, frame: RawFrame) -> Incoming {
    let Some(id) = id.as_u64() else {
        return Incoming::Malformed(format!("response id {id} is not a non-negative integer"));
    };
    let id = RequestId::new(id);

    let outcome = match (frame.error, frame.result) {
        (Some(error), _) => Err(error),
        (None, Some(result)) => Ok(result),
        (None, None) => {
            return Incoming::Malformed(format!("response {id} has neither result nor error"));
        }
    };
    Incoming::Response(Response { id, outcome })
}

fn decode_notification(frame: RawFrame) -> Incoming {
    if let Some(error) = frame.error {
        return Incoming::Malformed(format!(
            "uncorrelated error {}: {}",
            error.code, error.message
        ));
    }
    let Some(Value::Object(mut params)) = frame.params else {
        return Incoming::Malformed("frame has neither id nor params object".to_string());
    };
    let Some(Value::String(token)) = params.remove("subscription") else {
        return Incoming::Malformed("notification params carry no subscription".to_string());
    };
    Incoming::Notification(Notification {
        method: frame.method.unwrap_or_default(),
        token: SubscriptionToken::from(token),
        payload: params.remove("result").unwrap_or(Value::Null),
    })
}
