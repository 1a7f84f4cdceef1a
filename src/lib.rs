//! # eth-pubsub
//!
//! Client-side JSON-RPC 2.0 engine over a persistent WebSocket, built for
//! Ethereum node pub/sub (`eth_subscribe`).
//!
//! Requests are correlated with their responses by numeric id. A response
//! to a subscribe request turns into a notification stream, and server
//! pushes are routed to the right stream by subscription token. When the
//! connection ends, every pending request fails with
//! [`ClientError::ConnectionLost`] and every stream closes.
//!
//! ## Architecture
//!
//! ```text
//! Caller tasks
//!     │
//!     ├── RpcClient / PendingCall (client/)
//!     │
//!     ├── Session (client/)
//!     │     ├── RequestTracker        (domain/)  id -> pending request
//!     │     └── SubscriptionRegistry  (domain/)  token -> stream
//!     │
//!     ├── Dispatcher (client/)  one per connection epoch
//!     ├── codec (codec/)        JSON-RPC envelopes
//!     │
//!     └── Transport (transport/)
//!           ├── WsTransport      tokio-tungstenite
//!           └── MemoryTransport  in-process loopback
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use eth_pubsub::config::ClientConfig;
//! use eth_pubsub::{RpcClient, WsTransport};
//!
//! # async fn run() -> Result<(), eth_pubsub::ClientError> {
//! let config = ClientConfig::new("ws://127.0.0.1:8546");
//! let transport = WsTransport::new(config.ws_url.clone(), config.connect_timeout);
//! let client = RpcClient::new(Arc::new(transport), &config);
//! client.connect().await?;
//!
//! let mut heads = client.new_heads_notifications().await?;
//! while let Some(header) = heads.recv().await {
//!     println!("{header}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod eth;
pub mod transport;

pub use client::{PendingCall, RpcClient};
pub use domain::{ConnectionState, RequestId, Subscription, SubscriptionToken};
pub use error::{ClientError, RpcErrorObject};
pub use eth::SubscriptionKind;
pub use transport::{MemoryPeer, MemoryTransport, Transport, WsTransport};
