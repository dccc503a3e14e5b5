//! Authenticated session channel between two documents.
//!
//! A [`Connection`] owns one peer/listener pair, runs the parent/child
//! handshake, keeps the channel alive with a receive-driven heartbeat and
//! exposes send/receive/close primitives plus lifecycle callbacks. The
//! child side authenticates the peer with a single-use random secret and an
//! origin filter; the parent side trusts the origin it was configured with.

pub mod config;
pub mod connection;
pub mod error;

mod handshake;

pub use config::{
    ConnectionFilter, EndpointRole, EstablishConfig, HeartbeatConfig, CONNECTION_TIMEOUT,
    HANDSHAKE_TIMEOUT, PING_TIMEOUT,
};
pub use connection::{
    CloseReason, CommonHandler, Connection, HandlerId, RequestHandler, ResponseHandler,
};
pub use error::{ConnectionError, Result};
