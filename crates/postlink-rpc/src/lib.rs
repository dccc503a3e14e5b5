//! Request/response correlation over an established connection.
//!
//! [`RpcLayer`] turns the raw request and response frames of a
//! [`Connection`](postlink_connection::Connection) into a calling
//! convention: outbound calls get a fresh correlation id and a
//! [`PendingCall`] that settles when the reply arrives, inbound requests
//! queue until the application takes them with [`RpcLayer::next`] or
//! [`RpcLayer::try_next`] and answers through [`ReceivedRequest`]. The
//! [`plugins`] module packages the connection and the layer as registry
//! capabilities.

pub mod error;
pub mod layer;
pub mod plugins;
pub mod request;

pub use error::{Result, RpcError};
pub use layer::RpcLayer;
pub use plugins::{ConnectionPlugin, RpcPlugin, CONNECTION_PLUGIN, RPC_PLUGIN};
pub use request::{PendingCall, ReceivedRequest};
