use std::time::Duration;

use postlink_transport::Origin;

/// Errors that can occur while establishing or using a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The handshake matched cryptographically but the peer origin failed
    /// the connection filter. Fatal to the establishment attempt; the core
    /// never retries.
    #[error("did not expect a connection from peer '{0}'")]
    UnexpectedPeer(Origin),

    /// An operation was attempted on a connection that is not active.
    #[error("invalid connection state: {0}")]
    InvalidState(String),

    /// The handshake did not complete within its deadline.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The establish configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
