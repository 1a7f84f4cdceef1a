//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), each with a default.

use std::time::Duration;

use crate::eth::SubscriptionKind;

/// Default WebSocket endpoint (geth's default `--ws.port`).
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8546";

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the node.
    pub ws_url: String,

    /// Default per-request timeout. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,

    /// Upper bound for opening the socket. Also bounds how long `close`
    /// waits for the socket to acknowledge.
    pub connect_timeout: Duration,

    /// Per-subscription queue capacity. `None` means unbounded: memory
    /// grows with a consumer that stops reading.
    pub subscription_buffer: Option<usize>,

    /// Subscriptions opened by the binary at startup.
    pub subscribe_kinds: Vec<SubscriptionKind>,
}

impl ClientConfig {
    /// Builds a configuration for `ws_url` with every other setting at its
    /// default.
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            request_timeout: Some(Duration::from_millis(30_000)),
            connect_timeout: Duration::from_millis(10_000),
            subscription_buffer: None,
            subscribe_kinds: vec![SubscriptionKind::NewPendingTransactions],
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is missing or unparsable.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// | Variable                 | Default                   |
    /// |--------------------------|---------------------------|
    /// | `ETH_WS_URL`             | `ws://127.0.0.1:8546`     |
    /// | `RPC_REQUEST_TIMEOUT_MS` | `30000` (`0` = no limit)  |
    /// | `RPC_CONNECT_TIMEOUT_MS` | `10000`                   |
    /// | `SUBSCRIPTION_BUFFER`    | `0` (unbounded)           |
    /// | `SUBSCRIBE_KINDS`        | `newPendingTransactions`  |
    ///
    /// # Errors
    ///
    /// Returns an error if `SUBSCRIBE_KINDS` names an unknown kind.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let ws_url = std::env::var("ETH_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());

        let request_timeout = match parse_env("RPC_REQUEST_TIMEOUT_MS", 30_000_u64) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let connect_timeout = Duration::from_millis(parse_env("RPC_CONNECT_TIMEOUT_MS", 10_000));

        let subscription_buffer = match parse_env("SUBSCRIPTION_BUFFER", 0_usize) {
            0 => None,
            n => Some(n),
        };

        let subscribe_kinds = std::env::var("SUBSCRIBE_KINDS")
            .unwrap_or_else(|_| "newPendingTransactions".to_string())
            .split(',')
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<SubscriptionKind>, _>>()?;

        Ok(Self {
            ws_url,
            request_timeout,
            connect_timeout,
            subscription_buffer,
            subscribe_kinds,
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WS_URL)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
