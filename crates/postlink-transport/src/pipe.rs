use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::event::{MessageEvent, Origin, PostTarget};
use crate::traits::{Listener, MessageHandler, PeerHandle, SubscriptionId};

/// In-process message pipe between two origins.
///
/// Each endpoint implements both [`PeerHandle`] (posting reaches the other
/// side) and [`Listener`] (receiving what the other side posted), so one
/// endpoint plays the role a window handle plays in a browser embedding.
/// Delivery runs on a dedicated thread per endpoint, preserving arrival
/// order and never interleaving two handlers of the same endpoint.
pub struct MessagePipe;

impl MessagePipe {
    /// Create a linked pair of endpoints with the given origins.
    pub fn pair(
        origin_a: impl Into<String>,
        origin_b: impl Into<String>,
    ) -> Result<(PipeEndpoint, PipeEndpoint)> {
        let shared_a = EndpointShared::spawn(Origin::parse(origin_a)?);
        let shared_b = EndpointShared::spawn(Origin::parse(origin_b)?);

        let a = PipeEndpoint {
            local: shared_a.clone(),
            remote: shared_b.clone(),
        };
        let b = PipeEndpoint {
            local: shared_b,
            remote: shared_a,
        };

        Ok((a, b))
    }
}

struct EndpointShared {
    origin: Origin,
    subscribers: Mutex<Vec<(SubscriptionId, MessageHandler)>>,
    next_subscription: AtomicU64,
    severed: AtomicBool,
    tx: mpsc::Sender<MessageEvent>,
}

impl EndpointShared {
    fn spawn(origin: Origin) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<MessageEvent>();
        let shared = Arc::new(Self {
            origin,
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            severed: AtomicBool::new(false),
            tx,
        });

        let weak: Weak<Self> = Arc::downgrade(&shared);
        thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                shared.deliver(&event);
            }
        });

        shared
    }

    fn deliver(&self, event: &MessageEvent) {
        // Snapshot under the lock; handlers run without it so they may
        // subscribe, unsubscribe, or post.
        let handlers: Vec<MessageHandler> = self
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }
}

/// One side of a [`MessagePipe`].
#[derive(Clone)]
pub struct PipeEndpoint {
    local: Arc<EndpointShared>,
    remote: Arc<EndpointShared>,
}

impl PipeEndpoint {
    /// Stop forwarding outbound messages, emulating a dead document.
    ///
    /// Inbound delivery is unaffected; sever both endpoints to silence a
    /// link completely.
    pub fn sever(&self) {
        self.local.severed.store(true, Ordering::SeqCst);
    }
}

impl PeerHandle for PipeEndpoint {
    fn post(&self, message: Value, target: &PostTarget, attachments: Vec<Bytes>) {
        if self.local.severed.load(Ordering::SeqCst) {
            debug!(origin = %self.local.origin, "pipe severed, dropping outbound message");
            return;
        }
        if !target.accepts(&self.remote.origin) {
            debug!(
                target_origin = %self.remote.origin,
                "post target does not match receiving origin, dropping"
            );
            return;
        }

        let event = MessageEvent {
            origin: self.local.origin.clone(),
            data: message,
            attachments,
        };
        // Receiver gone means both remote endpoints were dropped;
        // fire-and-forget semantics make that a silent drop.
        let _ = self.remote.tx.send(event);
    }
}

impl Listener for PipeEndpoint {
    fn origin(&self) -> Origin {
        self.local.origin.clone()
    }

    fn subscribe(&self, handler: MessageHandler) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.local.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.local
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.local
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .retain(|(existing, _)| *existing != id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    const RECV_WINDOW: Duration = Duration::from_millis(500);

    fn pair() -> (PipeEndpoint, PipeEndpoint) {
        MessagePipe::pair("https://a.example", "https://b.example").expect("pair should build")
    }

    #[test]
    fn posted_message_reaches_remote_subscriber() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();

        b.subscribe(Arc::new(move |event| {
            tx.send((event.origin.clone(), event.data.clone()))
                .expect("test channel should accept");
        }));

        a.post(json!({"hello": "world"}), &PostTarget::Wildcard, vec![]);

        let (origin, data) = rx.recv_timeout(RECV_WINDOW).expect("message should arrive");
        assert_eq!(origin.as_str(), "https://a.example");
        assert_eq!(data, json!({"hello": "world"}));
    }

    #[test]
    fn addressed_post_to_wrong_origin_is_dropped() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();

        b.subscribe(Arc::new(move |event| {
            tx.send(event.data.clone()).expect("test channel should accept");
        }));

        let elsewhere =
            PostTarget::Origin(Origin::parse("https://c.example").expect("origin should parse"));
        a.post(json!(1), &elsewhere, vec![]);

        let addressed =
            PostTarget::Origin(Origin::parse("https://b.example").expect("origin should parse"));
        a.post(json!(2), &addressed, vec![]);

        // Only the correctly addressed message arrives.
        assert_eq!(
            rx.recv_timeout(RECV_WINDOW).expect("message should arrive"),
            json!(2)
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn delivery_preserves_post_order() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();

        b.subscribe(Arc::new(move |event| {
            tx.send(event.data.clone()).expect("test channel should accept");
        }));

        for i in 0..16 {
            a.post(json!(i), &PostTarget::Wildcard, vec![]);
        }

        for i in 0..16 {
            assert_eq!(
                rx.recv_timeout(RECV_WINDOW).expect("message should arrive"),
                json!(i)
            );
        }
    }

    #[test]
    fn severed_endpoint_stops_sending() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();

        b.subscribe(Arc::new(move |event| {
            tx.send(event.data.clone()).expect("test channel should accept");
        }));

        a.sever();
        a.post(json!("lost"), &PostTarget::Wildcard, vec![]);

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn unsubscribe_stops_callbacks() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();

        let id = b.subscribe(Arc::new(move |event| {
            tx.send(event.data.clone()).expect("test channel should accept");
        }));

        a.post(json!(1), &PostTarget::Wildcard, vec![]);
        assert_eq!(
            rx.recv_timeout(RECV_WINDOW).expect("message should arrive"),
            json!(1)
        );

        b.unsubscribe(id);
        a.post(json!(2), &PostTarget::Wildcard, vec![]);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn attachments_ride_alongside_the_body() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();

        b.subscribe(Arc::new(move |event| {
            tx.send(event.attachments.clone())
                .expect("test channel should accept");
        }));

        a.post(
            json!("with-bytes"),
            &PostTarget::Wildcard,
            vec![Bytes::from_static(b"blob")],
        );

        let attachments = rx.recv_timeout(RECV_WINDOW).expect("message should arrive");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].as_ref(), b"blob");
    }
}
