/// Errors that can occur at the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The supplied origin string is not `scheme://authority` shaped.
    #[error("invalid origin '{0}'")]
    InvalidOrigin(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
