use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EnvelopeError, Result};

/// Correlation id for one request/response pair. Unique per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random request id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// URI-shaped string identifying the logical target of a request, analogous
/// to an RPC method name, e.g. `greet:hello` or `store:orders/list`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Route(String);

impl Route {
    /// Parse and validate a route string.
    ///
    /// A route is `<scheme>:<remainder>` where the scheme follows RFC 3986
    /// (leading ASCII letter, then letters, digits, `+`, `-`, `.`) and the
    /// remainder is non-empty.
    pub fn parse(route: impl Into<String>) -> Result<Self> {
        let route = route.into();

        let Some((scheme, remainder)) = route.split_once(':') else {
            return Err(EnvelopeError::InvalidRoute(route));
        };
        if !is_valid_scheme(scheme) || remainder.is_empty() {
            return Err(EnvelopeError::InvalidRoute(route));
        }

        Ok(Self(route))
    }

    /// The route as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
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

impl TryFrom<String> for Route {
    type Error = EnvelopeError;

    fn try_from(route: String) -> Result<Self> {
        Self::parse(route)
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
