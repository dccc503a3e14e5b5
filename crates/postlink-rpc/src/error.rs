use std::time::Duration;

use postlink_connection::{CloseReason, ConnectionError};

/// Errors that can occur on the request/response layer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// An operation was attempted in a state that cannot serve it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The connection went away while a call was in flight.
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseReason),

    /// No response arrived within the caller's deadline.
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub type Result<T> = std::result::Result<T, RpcError>;
