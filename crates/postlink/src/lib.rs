//! Authenticated message channels with request/response calling between
//! documents that share a post-message style transport.
//!
//! # Crate Structure
//!
//! - [`transport`] — Origins, message events and the peer/listener seam
//! - [`envelope`] — Wire envelope, secrets, routes and correlation ids
//! - [`connection`] — Handshake, heartbeat and the session lifecycle
//! - [`rpc`] — Request/response correlation over a connection
//! - [`plugin`] — Capability registry for composing higher layers

/// Re-export transport types.
pub mod transport {
    pub use postlink_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use postlink_envelope::*;
}

/// Re-export connection types.
pub mod connection {
    pub use postlink_connection::*;
}

/// Re-export plugin registry types.
pub mod plugin {
    pub use postlink_plugin::*;
}

/// Re-export request/response types.
pub mod rpc {
    pub use postlink_rpc::*;
}
