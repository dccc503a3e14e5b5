use std::fmt;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Result, TransportError};

/// The scheme+authority identity of a document, the unit of trust for
/// message source filtering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    /// Parse an origin string.
    ///
    /// The string must be `scheme://authority` shaped with a non-empty
    /// authority, e.g. `https://a.example`. Trailing slashes are rejected
    /// so that equality comparison stays byte-wise.
    pub fn parse(origin: impl Into<String>) -> Result<Self> {
        let origin = origin.into();

        let Some((scheme, authority)) = origin.split_once("://") else {
            return Err(TransportError::InvalidOrigin(origin));
        };
        if !is_valid_scheme(scheme) || authority.is_empty() || authority.contains('/') {
            return Err(TransportError::InvalidOrigin(origin));
        }

        Ok(Self(origin))
    }

    /// The origin as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Addressing of an outbound message.
///
/// A child that does not yet know its parent's origin posts with
/// [`PostTarget::Wildcard`]; everything after the handshake is addressed
/// to a specific origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostTarget {
    /// Deliver regardless of the receiving document's origin.
    Wildcard,
    /// Deliver only if the receiving document has exactly this origin.
    Origin(Origin),
}

impl PostTarget {
    /// Whether a document with `origin` may receive a message with this target.
    pub fn accepts(&self, origin: &Origin) -> bool {
        match self {
            PostTarget::Wildcard => true,
            PostTarget::Origin(target) => target == origin,
        }
    }
}

/// An inbound message as seen by a [`crate::Listener`] subscriber.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Origin of the sending document.
    pub origin: Origin,
    /// The message body. Opaque at this layer.
    pub data: Value,
    /// Binary attachments riding alongside the message body.
    pub attachments: Vec<Bytes>,
}
