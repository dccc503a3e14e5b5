//! Origin-addressed, fire-and-forget message transport abstraction.
//!
//! Two capability traits model the transport boundary: a [`PeerHandle`] can
//! receive addressed messages, a [`Listener`] can hand out inbound message
//! subscriptions and reports its own origin. Any object satisfying the two
//! shapes works — a window handle in a browser embedding, or the in-process
//! [`MessagePipe`] used by tests and examples.

pub mod error;
pub mod event;
pub mod pipe;
pub mod traits;

pub use error::{Result, TransportError};
pub use event::{MessageEvent, Origin, PostTarget};
pub use pipe::{MessagePipe, PipeEndpoint};
pub use traits::{Listener, MessageHandler, PeerHandle, SubscriptionId};
