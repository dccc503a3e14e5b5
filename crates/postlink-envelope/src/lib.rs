//! Wire-level message shapes and their validator.
//!
//! Every protocol message carries a literal `domain` marker so that
//! unrelated traffic sharing the same transport can be told apart and
//! silently ignored. Validation is total: a value either parses to exactly
//! one [`Envelope`] variant or it is discarded — malformed input is never
//! an error at this layer.

pub mod envelope;
pub mod error;
pub mod route;
pub mod secret;

pub use envelope::{Envelope, DOMAIN};
pub use error::{EnvelopeError, Result};
pub use route::{RequestId, Route};
pub use secret::{Secret, SECRET_LEN};
