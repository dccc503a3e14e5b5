use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Instant;

use bytes::Bytes;
use postlink_envelope::{Envelope, RequestId, Route};
use postlink_transport::{Listener, MessageEvent, Origin, PeerHandle, PostTarget, SubscriptionId};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::{EndpointMode, EndpointRole, EstablishConfig, HeartbeatConfig};
use crate::error::{ConnectionError, Result};
use crate::handshake;

/// Why a connection stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// This endpoint called [`Connection::close`].
    ClosedByThis,
    /// The peer announced its close over the wire.
    ClosedByPeer,
    /// The heartbeat saw nothing from the peer for too long.
    TimedOut,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedByThis => write!(f, "closed by this"),
            Self::ClosedByPeer => write!(f, "closed by peer"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Callback for application payloads arriving on a connection.
pub type CommonHandler = Arc<dyn Fn(&Value, &[Bytes]) + Send + Sync>;

/// Callback for inbound request frames.
pub type RequestHandler = Arc<dyn Fn(RequestId, &Route, &Value, &[Bytes]) + Send + Sync>;

/// Callback for inbound response frames.
pub type ResponseHandler = Arc<dyn Fn(RequestId, &Value, &[Bytes]) + Send + Sync>;

type BeforeCloseHandler = Box<dyn FnOnce() + Send>;
type AfterCloseHandler = Box<dyn FnOnce(CloseReason) + Send>;

/// Token for removing a previously registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub(crate) struct State {
    pub(crate) peer: Option<Arc<dyn PeerHandle>>,
    pub(crate) peer_origin: Option<Origin>,
    pub(crate) last_received: Instant,
    pub(crate) dispatch_subscription: Option<SubscriptionId>,
    pub(crate) closing: bool,
}

pub(crate) struct Inner {
    pub(crate) listener: Arc<dyn Listener>,
    pub(crate) role: EndpointRole,
    pub(crate) heartbeat: HeartbeatConfig,
    pub(crate) state: Mutex<State>,
    message_handlers: Mutex<Vec<(HandlerId, CommonHandler)>>,
    request_handlers: Mutex<Vec<(HandlerId, RequestHandler)>>,
    response_handlers: Mutex<Vec<(HandlerId, ResponseHandler)>>,
    before_close: Mutex<Vec<(HandlerId, BeforeCloseHandler)>>,
    after_close: Mutex<Vec<(HandlerId, AfterCloseHandler)>>,
    next_handler_id: AtomicU64,
}

impl Inner {
    fn next_handler_id(&self) -> HandlerId {
        HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Peer handle and addressed origin, if the connection is still open.
    fn active_pair(&self) -> Option<(Arc<dyn PeerHandle>, Origin)> {
        let state = self.state.lock().expect("connection state poisoned");
        state.peer.clone().zip(state.peer_origin.clone())
    }

    fn stamp_received(&self) {
        let mut state = self.state.lock().expect("connection state poisoned");
        state.last_received = Instant::now();
    }
}

/// An established, authenticated channel to one peer document.
///
/// Cheap to clone; all clones share the same session. The connection stays
/// alive through a receive-driven heartbeat and stops being active when
/// either side closes it or the heartbeat gives up. Closing is idempotent
/// and terminal; a closed connection is never reused.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Run the handshake and start the heartbeat.
    ///
    /// Blocks until the handshake completes or the configured deadline
    /// passes. Child endpoints fail with
    /// [`ConnectionError::UnexpectedPeer`] when the echoing origin is not
    /// permitted by the filter, and tolerate any amount of unrelated
    /// traffic in the meantime.
    pub fn establish(config: EstablishConfig) -> Result<Self> {
        config.validate()?;
        let EstablishConfig {
            peer,
            listener,
            mode,
            handshake_timeout,
            heartbeat,
            ..
        } = config;

        let (role, peer_origin) = match &mode {
            EndpointMode::Parent { peer_origin } => {
                (EndpointRole::Parent, Some(peer_origin.clone()))
            }
            EndpointMode::Child { .. } => (EndpointRole::Child, None),
        };

        let inner = Arc::new(Inner {
            listener,
            role,
            heartbeat,
            state: Mutex::new(State {
                peer: Some(peer),
                peer_origin,
                last_received: Instant::now(),
                dispatch_subscription: None,
                closing: false,
            }),
            message_handlers: Mutex::new(Vec::new()),
            request_handlers: Mutex::new(Vec::new()),
            response_handlers: Mutex::new(Vec::new()),
            before_close: Mutex::new(Vec::new()),
            after_close: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(0),
        });

        let connection = Self { inner };
        // The long-lived subscription goes up before the handshake starts:
        // it ignores everything until the peer origin is known, and once the
        // handshake settles there is no window in which a frame from the
        // freshly established peer has no subscriber.
        connection.attach_dispatch();

        let outcome = match mode {
            EndpointMode::Child { filter } => {
                handshake::child(&connection.inner, &filter, handshake_timeout)
            }
            EndpointMode::Parent { .. } => {
                handshake::parent(&connection.inner, handshake_timeout)
            }
        };
        if let Err(error) = outcome {
            let subscription = {
                let mut state = connection
                    .inner
                    .state
                    .lock()
                    .expect("connection state poisoned");
                state.peer = None;
                state.dispatch_subscription.take()
            };
            if let Some(subscription) = subscription {
                connection.inner.listener.unsubscribe(subscription);
            }
            return Err(error);
        }

        connection.spawn_heartbeat();
        debug!(
            role = ?connection.inner.role,
            peer_origin = ?connection.peer_origin(),
            "connection established"
        );
        Ok(connection)
    }

    /// Send an application payload to the peer.
    pub fn send(&self, message: Value, attachments: Vec<Bytes>) -> Result<()> {
        let (peer, origin) = self.inner.active_pair().ok_or_else(|| {
            ConnectionError::InvalidState("cannot send over a closed connection".to_string())
        })?;
        trace!(peer_origin = %origin, "sending message");
        peer.post(
            Envelope::Common { payload: message }.to_value(),
            &PostTarget::Origin(origin),
            attachments,
        );
        Ok(())
    }

    /// Send a request frame expecting a correlated response.
    pub fn send_request(
        &self,
        request_id: RequestId,
        route: Route,
        payload: Value,
        attachments: Vec<Bytes>,
    ) -> Result<()> {
        let (peer, origin) = self.inner.active_pair().ok_or_else(|| {
            ConnectionError::InvalidState("cannot send over a closed connection".to_string())
        })?;
        trace!(peer_origin = %origin, %request_id, %route, "sending request");
        peer.post(
            Envelope::Request {
                request_id,
                route,
                payload,
            }
            .to_value(),
            &PostTarget::Origin(origin),
            attachments,
        );
        Ok(())
    }

    /// Send the correlated reply to a previously received request.
    pub fn send_response(
        &self,
        request_id: RequestId,
        payload: Value,
        attachments: Vec<Bytes>,
    ) -> Result<()> {
        let (peer, origin) = self.inner.active_pair().ok_or_else(|| {
            ConnectionError::InvalidState("cannot send over a closed connection".to_string())
        })?;
        trace!(peer_origin = %origin, %request_id, "sending response");
        peer.post(
            Envelope::Response {
                request_id,
                payload,
            }
            .to_value(),
            &PostTarget::Origin(origin),
            attachments,
        );
        Ok(())
    }

    /// Register a handler for incoming application payloads.
    ///
    /// Handlers run on the delivery thread in registration order.
    pub fn on_message(
        &self,
        handler: impl Fn(&Value, &[Bytes]) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.inner.next_handler_id();
        self.inner
            .message_handlers
            .lock()
            .expect("message handlers poisoned")
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_message_handler(&self, id: HandlerId) {
        self.inner
            .message_handlers
            .lock()
            .expect("message handlers poisoned")
            .retain(|(existing, _)| *existing != id);
    }

    /// Register a handler for inbound request frames.
    pub fn on_request(
        &self,
        handler: impl Fn(RequestId, &Route, &Value, &[Bytes]) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.inner.next_handler_id();
        self.inner
            .request_handlers
            .lock()
            .expect("request handlers poisoned")
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_request_handler(&self, id: HandlerId) {
        self.inner
            .request_handlers
            .lock()
            .expect("request handlers poisoned")
            .retain(|(existing, _)| *existing != id);
    }

    /// Register a handler for inbound response frames.
    pub fn on_response(
        &self,
        handler: impl Fn(RequestId, &Value, &[Bytes]) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.inner.next_handler_id();
        self.inner
            .response_handlers
            .lock()
            .expect("response handlers poisoned")
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_response_handler(&self, id: HandlerId) {
        self.inner
            .response_handlers
            .lock()
            .expect("response handlers poisoned")
            .retain(|(existing, _)| *existing != id);
    }

    /// Register a one-shot handler that runs when *this* endpoint closes
    /// the connection, while sending is still possible.
    pub fn on_before_close(&self, handler: impl FnOnce() + Send + 'static) -> HandlerId {
        let id = self.inner.next_handler_id();
        self.inner
            .before_close
            .lock()
            .expect("before-close handlers poisoned")
            .push((id, Box::new(handler)));
        id
    }

    pub fn remove_before_close_handler(&self, id: HandlerId) {
        self.inner
            .before_close
            .lock()
            .expect("before-close handlers poisoned")
            .retain(|(existing, _)| *existing != id);
    }

    /// Register a one-shot handler that runs once the connection is gone,
    /// whatever the cause.
    pub fn on_after_close(
        &self,
        handler: impl FnOnce(CloseReason) + Send + 'static,
    ) -> HandlerId {
        let id = self.inner.next_handler_id();
        self.inner
            .after_close
            .lock()
            .expect("after-close handlers poisoned")
            .push((id, Box::new(handler)));
        id
    }

    pub fn remove_after_close_handler(&self, id: HandlerId) {
        self.inner
            .after_close
            .lock()
            .expect("after-close handlers poisoned")
            .retain(|(existing, _)| *existing != id);
    }

    /// Whether the connection can still carry traffic.
    pub fn is_active(&self) -> bool {
        self.inner.active_pair().is_some()
    }

    /// The authenticated origin of the peer, while active.
    pub fn peer_origin(&self) -> Option<Origin> {
        self.inner
            .state
            .lock()
            .expect("connection state poisoned")
            .peer_origin
            .clone()
    }

    pub fn role(&self) -> EndpointRole {
        self.inner.role
    }

    /// Close the connection from this side.
    ///
    /// Runs the before-close handlers (which may still send), announces the
    /// close to the peer, then tears down. Calling this on an already
    /// closed or concurrently closing connection is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock().expect("connection state poisoned");
            if state.closing || state.peer.is_none() {
                return;
            }
            state.closing = true;
        }

        let handlers: Vec<(HandlerId, BeforeCloseHandler)> = std::mem::take(
            &mut *self
                .inner
                .before_close
                .lock()
                .expect("before-close handlers poisoned"),
        );
        for (_, handler) in handlers {
            handler();
        }

        if let Some((peer, origin)) = self.inner.active_pair() {
            peer.post(
                Envelope::ConnectionClosed.to_value(),
                &PostTarget::Origin(origin),
                Vec::new(),
            );
        }

        finish_close(&self.inner, CloseReason::ClosedByThis);
    }

    fn attach_dispatch(&self) {
        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.listener.subscribe(Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                dispatch(&inner, event);
            }
        }));
        let mut state = self.inner.state.lock().expect("connection state poisoned");
        state.dispatch_subscription = Some(subscription);
    }

    fn spawn_heartbeat(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let config = self.inner.heartbeat;
        thread::spawn(move || loop {
            thread::sleep(config.ping_timeout);
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let (elapsed, pair) = {
                let state = inner.state.lock().expect("connection state poisoned");
                if state.peer.is_none() {
                    return;
                }
                (
                    state.last_received.elapsed(),
                    state.peer.clone().zip(state.peer_origin.clone()),
                )
            };
            if elapsed >= config.connection_timeout {
                warn!(elapsed = ?elapsed, "peer went silent, closing connection");
                finish_close(&inner, CloseReason::TimedOut);
                return;
            }
            if elapsed >= config.ping_timeout {
                if let Some((peer, origin)) = pair {
                    trace!(peer_origin = %origin, "pinging idle peer");
                    peer.post(Envelope::Ping.to_value(), &PostTarget::Origin(origin), Vec::new());
                }
            }
        });
    }
}

/// Route one inbound event to the right reaction.
///
/// Anything that fails to parse, carries a foreign domain or arrives from
/// somewhere other than the authenticated peer is dropped without a trace
/// on the wire; shared listeners see plenty of unrelated traffic.
fn dispatch(inner: &Arc<Inner>, event: &MessageEvent) {
    let expected_origin = {
        let state = inner.state.lock().expect("connection state poisoned");
        state.peer_origin.clone()
    };
    let Some(expected_origin) = expected_origin else {
        return;
    };
    if event.origin != expected_origin {
        return;
    }
    let Some(envelope) = Envelope::parse(&event.data) else {
        return;
    };
    trace!(kind = envelope.kind(), origin = %event.origin, "dispatching frame");

    match envelope {
        Envelope::ConnectionClosed => {
            debug!(peer_origin = %event.origin, "peer closed the connection");
            finish_close(inner, CloseReason::ClosedByPeer);
        }
        Envelope::Ping => {
            inner.stamp_received();
            if let Some((peer, origin)) = inner.active_pair() {
                peer.post(Envelope::Pong.to_value(), &PostTarget::Origin(origin), Vec::new());
            }
        }
        Envelope::Pong => {
            inner.stamp_received();
        }
        Envelope::Common { payload } => {
            inner.stamp_received();
            let handlers: Vec<CommonHandler> = inner
                .message_handlers
                .lock()
                .expect("message handlers poisoned")
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect();
            for handler in handlers {
                handler(&payload, &event.attachments);
            }
        }
        Envelope::Request {
            request_id,
            route,
            payload,
        } => {
            inner.stamp_received();
            let handlers: Vec<RequestHandler> = inner
                .request_handlers
                .lock()
                .expect("request handlers poisoned")
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect();
            for handler in handlers {
                handler(request_id, &route, &payload, &event.attachments);
            }
        }
        Envelope::Response {
            request_id,
            payload,
        } => {
            inner.stamp_received();
            let handlers: Vec<ResponseHandler> = inner
                .response_handlers
                .lock()
                .expect("response handlers poisoned")
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect();
            for handler in handlers {
                handler(request_id, &payload, &event.attachments);
            }
        }
        // Handshake traffic after establishment has no meaning here.
        Envelope::HandshakeInit { .. } | Envelope::HandshakeComplete { .. } => {}
    }
}

/// Tear the session down and notify after-close handlers exactly once.
pub(crate) fn finish_close(inner: &Arc<Inner>, reason: CloseReason) {
    let subscription = {
        let mut state = inner.state.lock().expect("connection state poisoned");
        if state.peer.is_none() {
            return;
        }
        state.peer = None;
        state.dispatch_subscription.take()
    };
    if let Some(subscription) = subscription {
        inner.listener.unsubscribe(subscription);
    }

    inner
        .message_handlers
        .lock()
        .expect("message handlers poisoned")
        .clear();
    inner
        .request_handlers
        .lock()
        .expect("request handlers poisoned")
        .clear();
    inner
        .response_handlers
        .lock()
        .expect("response handlers poisoned")
        .clear();
    inner
        .before_close
        .lock()
        .expect("before-close handlers poisoned")
        .clear();

    let handlers: Vec<(HandlerId, AfterCloseHandler)> = std::mem::take(
        &mut *inner
            .after_close
            .lock()
            .expect("after-close handlers poisoned"),
    );
    debug!(reason = %reason, "connection closed");
    for (_, handler) in handlers {
        handler(reason);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::mpsc;
    use std::time::Duration;

    use postlink_transport::{MessageHandler, MessagePipe, PipeEndpoint};
    use serde_json::json;

    use super::*;
    use crate::config::ConnectionFilter;

    fn origin(text: &str) -> Origin {
        Origin::parse(text).expect("origin should parse")
    }

    /// Listener wrapper that records whether the endpoint was ever left
    /// with no subscriber at all after the first one went up.
    struct CountingListener {
        inner: Arc<PipeEndpoint>,
        active: AtomicUsize,
        went_dark: AtomicBool,
    }

    impl CountingListener {
        fn new(inner: Arc<PipeEndpoint>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                active: AtomicUsize::new(0),
                went_dark: AtomicBool::new(false),
            })
        }
    }

    impl Listener for CountingListener {
        fn origin(&self) -> Origin {
            self.inner.origin()
        }

        fn subscribe(&self, handler: MessageHandler) -> SubscriptionId {
            self.active.fetch_add(1, Ordering::SeqCst);
            self.inner.subscribe(handler)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.went_dark.store(true, Ordering::SeqCst);
            }
            self.inner.unsubscribe(id);
        }
    }

    fn fast_heartbeat() -> HeartbeatConfig {
        HeartbeatConfig::new(Duration::from_millis(50), Duration::from_millis(400))
    }

    fn establish_pair() -> (Connection, Connection) {
        let (parent_end, child_end) =
            MessagePipe::pair("https://parent.example", "https://child.example")
                .expect("pipe should build");
        let parent_end = Arc::new(parent_end);
        let child_end = Arc::new(child_end);

        let parent_config = EstablishConfig::parent(
            parent_end.clone(),
            parent_end.clone(),
            origin("https://child.example"),
        )
        .with_heartbeat(fast_heartbeat());
        let child_config = EstablishConfig::child(child_end.clone(), child_end.clone())
            .with_connection_filter(ConnectionFilter::allow(vec![origin(
                "https://parent.example",
            )]))
            .with_heartbeat(fast_heartbeat());

        let parent_thread = thread::spawn(move || Connection::establish(parent_config));
        thread::sleep(Duration::from_millis(20));
        let child = Connection::establish(child_config).expect("child should establish");
        let parent = parent_thread
            .join()
            .expect("parent thread should finish")
            .expect("parent should establish");
        (parent, child)
    }

    #[test]
    fn establish_reports_authenticated_peer_origins() {
        let (parent, child) = establish_pair();
        assert!(parent.is_active());
        assert!(child.is_active());
        assert_eq!(parent.role(), EndpointRole::Parent);
        assert_eq!(child.role(), EndpointRole::Child);
        assert_eq!(parent.peer_origin(), Some(origin("https://child.example")));
        assert_eq!(child.peer_origin(), Some(origin("https://parent.example")));
        child.close();
    }

    #[test]
    fn endpoints_stay_subscribed_across_the_handshake_to_dispatch_handover() {
        let (parent_end, child_end) =
            MessagePipe::pair("https://parent.example", "https://child.example")
                .expect("pipe should build");
        let parent_end = Arc::new(parent_end);
        let child_end = Arc::new(child_end);
        let parent_listener = CountingListener::new(parent_end.clone());
        let child_listener = CountingListener::new(child_end.clone());

        let parent_config = EstablishConfig::parent(
            parent_end.clone(),
            parent_listener.clone(),
            origin("https://child.example"),
        )
        .with_heartbeat(fast_heartbeat());
        let child_config = EstablishConfig::child(child_end.clone(), child_listener.clone())
            .with_connection_filter(ConnectionFilter::allow(vec![origin(
                "https://parent.example",
            )]))
            .with_heartbeat(fast_heartbeat());

        let parent_thread = thread::spawn(move || Connection::establish(parent_config));
        thread::sleep(Duration::from_millis(20));
        let child = Connection::establish(child_config).expect("child should establish");

        // The child is fully established and may speak right away, before
        // the parent's establish call has even returned.
        child.send(json!("first"), Vec::new()).expect("send should succeed");

        let parent = parent_thread
            .join()
            .expect("parent thread should finish")
            .expect("parent should establish");
        let (tx, rx) = mpsc::channel();
        parent.on_message(move |payload, _| {
            let _ = tx.send(payload.clone());
        });
        child.send(json!("second"), Vec::new()).expect("send should succeed");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)),
            Ok(json!("second"))
        );

        // At no point between the handshake subscription going up and the
        // connection closing may an endpoint have zero subscribers; a frame
        // landing in such a window would vanish.
        assert!(!parent_listener.went_dark.load(Ordering::SeqCst));
        assert!(!child_listener.went_dark.load(Ordering::SeqCst));
        child.close();
    }

    #[test]
    fn default_filter_rejects_every_parent() {
        let (parent_end, child_end) =
            MessagePipe::pair("https://parent.example", "https://child.example")
                .expect("pipe should build");
        let parent_end = Arc::new(parent_end);
        let child_end = Arc::new(child_end);

        let parent_config = EstablishConfig::parent(
            parent_end.clone(),
            parent_end.clone(),
            origin("https://child.example"),
        )
        .with_heartbeat(fast_heartbeat());
        let child_config = EstablishConfig::child(child_end.clone(), child_end.clone())
            .with_handshake_timeout(Duration::from_millis(500));

        let parent_thread = thread::spawn(move || Connection::establish(parent_config));
        thread::sleep(Duration::from_millis(20));
        let result = Connection::establish(child_config);
        assert!(
            matches!(result, Err(ConnectionError::UnexpectedPeer(ref peer))
                if *peer == origin("https://parent.example"))
        );

        // The initiation went out before the child applied its filter, so
        // the parent resolves; with nobody answering its pings it then
        // times out on its own.
        let parent = parent_thread
            .join()
            .expect("parent thread should finish")
            .expect("parent should resolve against the echoed initiation");
        let (tx, rx) = mpsc::channel();
        parent.on_after_close(move |reason| {
            let _ = tx.send(reason);
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(3)),
            Ok(CloseReason::TimedOut)
        );
        assert!(!parent.is_active());
    }

    #[test]
    fn child_without_a_parent_times_out() {
        let (_parent_end, child_end) =
            MessagePipe::pair("https://parent.example", "https://child.example")
                .expect("pipe should build");
        let child_end = Arc::new(child_end);

        let config = EstablishConfig::child(child_end.clone(), child_end)
            .with_connection_filter(ConnectionFilter::allow_all())
            .with_handshake_timeout(Duration::from_millis(100));
        assert!(matches!(
            Connection::establish(config),
            Err(ConnectionError::HandshakeTimeout(_))
        ));
    }

    #[test]
    fn mismatched_handshake_echo_is_ignored() {
        let (parent_end, child_end) =
            MessagePipe::pair("https://parent.example", "https://child.example")
                .expect("pipe should build");
        let parent_end = Arc::new(parent_end);
        let child_end = Arc::new(child_end);

        // Hand-rolled parent: replies with garbage first, then echoes the
        // real secret. The child must survive the first reply.
        let responder = parent_end.clone();
        let parent_origin = origin("https://parent.example");
        parent_end.subscribe(Arc::new(move |event| {
            let Some(Envelope::HandshakeInit { secret }) = Envelope::parse(&event.data) else {
                return;
            };
            let bogus = Envelope::HandshakeComplete {
                secret: postlink_envelope::Secret::from([0u8; 32]),
            };
            responder.post(
                bogus.to_value(),
                &PostTarget::Origin(event.origin.clone()),
                Vec::new(),
            );
            responder.post(
                Envelope::HandshakeComplete { secret }.to_value(),
                &PostTarget::Origin(event.origin.clone()),
                Vec::new(),
            );
        }));

        let config = EstablishConfig::child(child_end.clone(), child_end)
            .with_connection_filter(ConnectionFilter::allow(vec![parent_origin.clone()]))
            .with_handshake_timeout(Duration::from_millis(500));
        let connection = Connection::establish(config).expect("child should establish");
        assert_eq!(connection.peer_origin(), Some(parent_origin));
    }

    #[test]
    fn messages_fan_out_in_registration_order() {
        let (parent, child) = establish_pair();
        let (tx, rx) = mpsc::channel();

        let first = tx.clone();
        child.on_message(move |payload, _| {
            let _ = first.send(("first", payload.clone()));
        });
        let second = tx;
        child.on_message(move |payload, _| {
            let _ = second.send(("second", payload.clone()));
        });

        parent
            .send(json!({"n": 1}), Vec::new())
            .expect("send should succeed");

        let (label_a, payload_a) = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("first handler should fire");
        let (label_b, payload_b) = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("second handler should fire");
        assert_eq!((label_a, label_b), ("first", "second"));
        assert_eq!(payload_a, json!({"n": 1}));
        assert_eq!(payload_b, json!({"n": 1}));
        child.close();
    }

    #[test]
    fn removed_message_handlers_stop_firing() {
        let (parent, child) = establish_pair();
        let count = Arc::new(AtomicUsize::new(0));

        let counted = count.clone();
        let id = child.on_message(move |_, _| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        child.remove_message_handler(id);

        parent.send(json!("hello"), Vec::new()).expect("send should succeed");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        child.close();
    }

    #[test]
    fn close_is_idempotent_and_notifies_both_sides() {
        let (parent, child) = establish_pair();
        let (local_tx, local_rx) = mpsc::channel();
        let (remote_tx, remote_rx) = mpsc::channel();

        child.on_after_close(move |reason| {
            let _ = local_tx.send(reason);
        });
        parent.on_after_close(move |reason| {
            let _ = remote_tx.send(reason);
        });

        child.close();
        child.close();

        assert_eq!(
            local_rx.recv_timeout(Duration::from_secs(1)),
            Ok(CloseReason::ClosedByThis)
        );
        assert_eq!(
            remote_rx.recv_timeout(Duration::from_secs(1)),
            Ok(CloseReason::ClosedByPeer)
        );
        assert!(local_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!child.is_active());
        assert!(!parent.is_active());
    }

    #[test]
    fn before_close_handlers_can_still_send() {
        let (parent, child) = establish_pair();
        let (tx, rx) = mpsc::channel();

        parent.on_message(move |payload, _| {
            let _ = tx.send(payload.clone());
        });
        let goodbye = child.clone();
        child.on_before_close(move || {
            let _ = goodbye.send(json!("goodbye"), Vec::new());
        });

        child.close();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)),
            Ok(json!("goodbye"))
        );
    }

    #[test]
    fn send_after_close_is_an_invalid_state() {
        let (_parent, child) = establish_pair();
        child.close();
        assert!(matches!(
            child.send(json!(1), Vec::new()),
            Err(ConnectionError::InvalidState(_))
        ));
    }

    #[test]
    fn silent_peer_times_the_connection_out() {
        let (parent_end, child_end) =
            MessagePipe::pair("https://parent.example", "https://child.example")
                .expect("pipe should build");
        let parent_end = Arc::new(parent_end);
        let child_end = Arc::new(child_end);

        let parent_config = EstablishConfig::parent(
            parent_end.clone(),
            parent_end.clone(),
            origin("https://child.example"),
        )
        .with_heartbeat(fast_heartbeat());
        let child_config = EstablishConfig::child(child_end.clone(), child_end.clone())
            .with_connection_filter(ConnectionFilter::allow_all())
            .with_heartbeat(fast_heartbeat());

        let parent_thread = thread::spawn(move || Connection::establish(parent_config));
        thread::sleep(Duration::from_millis(20));
        let child = Connection::establish(child_config).expect("child should establish");
        let parent = parent_thread
            .join()
            .expect("parent thread should finish")
            .expect("parent should establish");

        let (child_tx, child_rx) = mpsc::channel();
        child.on_after_close(move |reason| {
            let _ = child_tx.send(reason);
        });
        let (parent_tx, parent_rx) = mpsc::channel();
        parent.on_after_close(move |reason| {
            let _ = parent_tx.send(reason);
        });

        // Cut the wire in both directions so no ping or pong gets through.
        parent_end.sever();
        child_end.sever();

        // Each side gives up on its own; no close frame crosses the wire.
        assert_eq!(
            child_rx.recv_timeout(Duration::from_secs(3)),
            Ok(CloseReason::TimedOut)
        );
        assert_eq!(
            parent_rx.recv_timeout(Duration::from_secs(3)),
            Ok(CloseReason::TimedOut)
        );
        assert!(!child.is_active());
        assert!(!parent.is_active());
    }

    #[test]
    fn pings_keep_an_otherwise_idle_connection_alive() {
        let (parent, child) = establish_pair();
        thread::sleep(Duration::from_millis(900));
        assert!(parent.is_active());
        assert!(child.is_active());
        child.close();
    }

    #[test]
    fn filter_on_parent_config_is_rejected() {
        let (parent_end, _child_end) =
            MessagePipe::pair("https://parent.example", "https://child.example")
                .expect("pipe should build");
        let parent_end = Arc::new(parent_end);
        let config = EstablishConfig::parent(
            parent_end.clone(),
            parent_end,
            origin("https://child.example"),
        )
        .with_connection_filter(ConnectionFilter::allow_all());
        assert!(matches!(
            Connection::establish(config),
            Err(ConnectionError::InvalidConfig(_))
        ));
    }
}
