use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

/// Length of a handshake secret in bytes.
pub const SECRET_LEN: usize = 32;

/// A single-use random byte sequence binding a `HandshakeComplete` reply to
/// the specific `HandshakeInit` that elicited it.
///
/// Secrets are compared byte-for-byte and redacted in debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl From<[u8; SECRET_LEN]> for Secret {
    fn from(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Secret {
    type Error = EnvelopeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SECRET_LEN] = bytes
            .try_into()
            .map_err(|_| EnvelopeError::InvalidSecretLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted:{SECRET_LEN} bytes>)")
    }
}
