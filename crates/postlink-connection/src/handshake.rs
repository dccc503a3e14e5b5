//! Establish-time handshake, child and parent halves.
//!
//! The child generates a fresh secret, broadcasts an initiation and waits
//! for the echo. Echoes from the wrong sender are ignored so that unrelated
//! frames sharing the listener cannot break an establishment in progress;
//! only a correctly-echoed secret from an origin the filter rejects is
//! fatal. The parent accepts the first initiation it sees and addresses the
//! echo to the origin it was configured with, which is the authentication
//! on that side.

use std::sync::{mpsc, Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use postlink_envelope::{Envelope, Secret};
use postlink_transport::PostTarget;
use tracing::debug;

use crate::config::ConnectionFilter;
use crate::connection::Inner;
use crate::error::{ConnectionError, Result};

pub(crate) fn child(inner: &Arc<Inner>, filter: &ConnectionFilter, timeout: Duration) -> Result<()> {
    let secret = Secret::generate();
    let local_origin = inner.listener.origin();
    debug!(origin = %local_origin, "child handshake started");

    let (tx, rx) = mpsc::channel::<Result<()>>();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let filter = filter.clone();
    let expected = secret.clone();

    let subscription = inner.listener.subscribe(Arc::new(move |event| {
        // The initiation is a broadcast, so our own send loops back here.
        if event.origin == local_origin {
            return;
        }
        let Some(Envelope::HandshakeComplete { secret }) = Envelope::parse(&event.data) else {
            return;
        };
        if secret != expected {
            debug!(origin = %event.origin, "handshake echo with a foreign secret, ignoring");
            return;
        }
        let Some(tx) = slot.lock().expect("handshake slot poisoned").take() else {
            return;
        };
        if !filter.permits(&event.origin) {
            let _ = tx.send(Err(ConnectionError::UnexpectedPeer(event.origin.clone())));
            return;
        }
        if let Some(inner) = weak.upgrade() {
            let mut state = inner.state.lock().expect("connection state poisoned");
            state.peer_origin = Some(event.origin.clone());
            state.last_received = Instant::now();
        }
        debug!(peer_origin = %event.origin, "child handshake complete");
        let _ = tx.send(Ok(()));
    }));

    post_broadcast(inner, Envelope::HandshakeInit { secret });

    let outcome = rx.recv_timeout(timeout);
    inner.listener.unsubscribe(subscription);
    match outcome {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::HandshakeTimeout(timeout)),
    }
}

pub(crate) fn parent(inner: &Arc<Inner>, timeout: Duration) -> Result<()> {
    let local_origin = inner.listener.origin();
    debug!(origin = %local_origin, "parent handshake started");

    let (tx, rx) = mpsc::channel::<()>();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let weak: Weak<Inner> = Arc::downgrade(inner);

    let subscription = inner.listener.subscribe(Arc::new(move |event| {
        if event.origin == local_origin {
            return;
        }
        let Some(Envelope::HandshakeInit { secret }) = Envelope::parse(&event.data) else {
            return;
        };
        let Some(tx) = slot.lock().expect("handshake slot poisoned").take() else {
            return;
        };
        if let Some(inner) = weak.upgrade() {
            let pair = {
                let mut state = inner.state.lock().expect("connection state poisoned");
                state.last_received = Instant::now();
                state.peer.clone().zip(state.peer_origin.clone())
            };
            if let Some((peer, origin)) = pair {
                // The echo is addressed, never broadcast: delivery itself
                // enforces that the peer is who we were configured for.
                peer.post(
                    Envelope::HandshakeComplete { secret }.to_value(),
                    &PostTarget::Origin(origin.clone()),
                    Vec::new(),
                );
                debug!(peer_origin = %origin, "parent handshake complete");
            }
        }
        let _ = tx.send(());
    }));

    let outcome = rx.recv_timeout(timeout);
    inner.listener.unsubscribe(subscription);
    outcome.map_err(|_| ConnectionError::HandshakeTimeout(timeout))
}

fn post_broadcast(inner: &Arc<Inner>, envelope: Envelope) {
    let peer = {
        let state = inner.state.lock().expect("connection state poisoned");
        state.peer.clone()
    };
    if let Some(peer) = peer {
        peer.post(envelope.to_value(), &PostTarget::Wildcard, Vec::new());
    }
}
