use std::collections::{HashMap, VecDeque};
use std::sync::{mpsc, Arc, Condvar, Mutex};

use bytes::Bytes;
use postlink_connection::Connection;
use postlink_envelope::{RequestId, Route};
use postlink_transport::Origin;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{Result, RpcError};
use crate::request::{CallOutcome, PendingCall, ReceivedRequest};

pub(crate) struct InboundRequest {
    pub(crate) request_id: RequestId,
    pub(crate) peer_origin: Origin,
    pub(crate) route: Route,
    pub(crate) payload: Value,
    pub(crate) attachments: Vec<Bytes>,
}

pub(crate) struct RpcShared {
    pub(crate) connection: Connection,
    pending: Mutex<HashMap<RequestId, mpsc::Sender<CallOutcome>>>,
    inbound: Mutex<VecDeque<InboundRequest>>,
    inbound_ready: Condvar,
}

/// Request/response calling convention over one connection.
///
/// Cheap to clone; all clones share the correlation state. When the
/// underlying connection closes, every in-flight call settles with
/// [`RpcError::ConnectionClosed`] and the inbound queue is discarded.
#[derive(Clone)]
pub struct RpcLayer {
    shared: Arc<RpcShared>,
}

impl RpcLayer {
    /// Attach a correlation layer to an established connection.
    pub fn new(connection: Connection) -> Self {
        let shared = Arc::new(RpcShared {
            connection: connection.clone(),
            pending: Mutex::new(HashMap::new()),
            inbound: Mutex::new(VecDeque::new()),
            inbound_ready: Condvar::new(),
        });

        let weak = Arc::downgrade(&shared);
        connection.on_request(move |request_id, route, payload, attachments| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            // The origin is gone only if the connection closed under us, in
            // which case the queue is about to be discarded anyway.
            let Some(peer_origin) = shared.connection.peer_origin() else {
                return;
            };
            trace!(%request_id, %route, "queueing inbound request");
            shared
                .inbound
                .lock()
                .expect("inbound queue poisoned")
                .push_back(InboundRequest {
                    request_id,
                    peer_origin,
                    route: route.clone(),
                    payload: payload.clone(),
                    attachments: attachments.to_vec(),
                });
            shared.inbound_ready.notify_all();
        });

        let weak = Arc::downgrade(&shared);
        connection.on_response(move |request_id, payload, attachments| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let sender = shared
                .pending
                .lock()
                .expect("pending map poisoned")
                .remove(&request_id);
            match sender {
                Some(sender) => {
                    let _ = sender.send(Ok((payload.clone(), attachments.to_vec())));
                }
                None => {
                    warn!(%request_id, "response does not match an in-flight call, dropping");
                }
            }
        });

        let weak = Arc::downgrade(&shared);
        connection.on_after_close(move |reason| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let pending: Vec<_> = shared
                .pending
                .lock()
                .expect("pending map poisoned")
                .drain()
                .collect();
            if !pending.is_empty() {
                debug!(count = pending.len(), %reason, "settling in-flight calls as failed");
            }
            for (_, sender) in pending {
                let _ = sender.send(Err(RpcError::ConnectionClosed(reason)));
            }
            shared
                .inbound
                .lock()
                .expect("inbound queue poisoned")
                .clear();
            shared.inbound_ready.notify_all();
        });

        Self { shared }
    }

    /// The connection this layer runs over.
    pub fn connection(&self) -> &Connection {
        &self.shared.connection
    }

    /// Start an outbound call.
    ///
    /// Registers the correlation id before the request frame leaves, so a
    /// response can never race past its pending entry.
    pub fn call(
        &self,
        route: Route,
        payload: Value,
        attachments: Vec<Bytes>,
    ) -> Result<PendingCall> {
        let request_id = RequestId::generate();
        let (tx, rx) = mpsc::channel();
        self.shared
            .pending
            .lock()
            .expect("pending map poisoned")
            .insert(request_id, tx);

        if let Err(error) = self
            .shared
            .connection
            .send_request(request_id, route, payload, attachments)
        {
            self.shared
                .pending
                .lock()
                .expect("pending map poisoned")
                .remove(&request_id);
            return Err(error.into());
        }
        Ok(PendingCall::new(request_id, rx))
    }

    /// Take the oldest queued request matching the route filter, if any.
    ///
    /// `None` as the filter accepts every route. Requests not matching the
    /// filter stay queued in their original position.
    pub fn try_next(&self, routes: Option<&[Route]>) -> Option<ReceivedRequest> {
        let mut queue = self.shared.inbound.lock().expect("inbound queue poisoned");
        take_first_matching(&mut queue, routes)
            .map(|inbound| ReceivedRequest::new(self.shared.clone(), inbound))
    }

    /// Block until a request matching the route filter arrives.
    ///
    /// Fails with [`RpcError::InvalidState`] once the connection is gone
    /// and the queue holds nothing that matches.
    pub fn next(&self, routes: Option<&[Route]>) -> Result<ReceivedRequest> {
        let mut queue = self.shared.inbound.lock().expect("inbound queue poisoned");
        loop {
            if let Some(inbound) = take_first_matching(&mut queue, routes) {
                return Ok(ReceivedRequest::new(self.shared.clone(), inbound));
            }
            if !self.shared.connection.is_active() {
                return Err(RpcError::InvalidState("connection closed".to_string()));
            }
            queue = self
                .shared
                .inbound_ready
                .wait(queue)
                .expect("inbound queue poisoned");
        }
    }

    /// Close the underlying connection.
    pub fn close(&self) {
        self.shared.connection.close();
    }
}

fn take_first_matching(
    queue: &mut VecDeque<InboundRequest>,
    routes: Option<&[Route]>,
) -> Option<InboundRequest> {
    let index = match routes {
        None => (!queue.is_empty()).then_some(0),
        Some(routes) => queue.iter().position(|request| routes.contains(&request.route)),
    };
    index.and_then(|index| queue.remove(index))
}
