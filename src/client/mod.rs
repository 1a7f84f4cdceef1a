//! Client layer: lifecycle, outbound requests and inbound routing.
//!
//! [`RpcClient`] is the caller-facing handle. Each connection epoch gets
//! its own [`Dispatcher`] task that consumes transport events in order and
//! routes them through the shared [`Session`].

pub mod dispatcher;
pub mod rpc_client;
pub mod session;

pub use dispatcher::Dispatcher;
pub use rpc_client::{PendingCall, RpcClient};
pub use session::Session;
