/// Errors that can occur when building envelope field values.
///
/// Note that *parsing* inbound wire values never raises these: unparsable
/// input is discarded at the validation boundary. These errors surface only
/// when local code constructs an invalid value, e.g. a malformed route.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvelopeError {
    /// The route string is not URI-shaped (`scheme:remainder`).
    #[error("invalid route '{0}': expected '<scheme>:<path>'")]
    InvalidRoute(String),

    /// The secret byte sequence has the wrong length.
    #[error("invalid secret length: {0}")]
    InvalidSecretLength(usize),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
