use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::event::{MessageEvent, Origin, PostTarget};

/// Callback invoked for every inbound message on a [`Listener`].
pub type MessageHandler = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// Token identifying one [`Listener`] subscription.
///
/// Returned by [`Listener::subscribe`] and consumed by
/// [`Listener::unsubscribe`]; comparing or storing handler closures directly
/// is not possible, so subscriptions are identified by token instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Build a subscription id from a raw counter value.
    ///
    /// Intended for transport implementations; ids only need to be unique
    /// per listener.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// The remote endpoint: can receive addressed, fire-and-forget messages.
///
/// Posting never fails and never blocks on the receiving side; an
/// undeliverable message (wrong target origin, dead peer) is silently
/// dropped, exactly like a message posted to a closed window.
pub trait PeerHandle: Send + Sync {
    /// Deliver `message` to the peer document if its origin matches `target`.
    fn post(&self, message: Value, target: &PostTarget, attachments: Vec<Bytes>);
}

/// The local endpoint: reports its own origin and hands out message
/// subscriptions.
pub trait Listener: Send + Sync {
    /// Origin of the document this listener belongs to.
    fn origin(&self) -> Origin;

    /// Subscribe to inbound messages. Handlers run in subscription order.
    fn subscribe(&self, handler: MessageHandler) -> SubscriptionId;

    /// Remove a previous subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}
