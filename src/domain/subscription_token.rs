//! Server-issued subscription token.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier the server returns from a subscribe call.
///
/// Every later push notification for that subscription carries the same
/// token in `params.subscription`. Geth issues hex strings such as
/// `0xcd0c3e8af590364c09d0fa6a1210faf5`, but the client never interprets
/// the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionToken(String);

impl SubscriptionToken {
    /// Wraps a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<String> for SubscriptionToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl AsRef<str> for SubscriptionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
