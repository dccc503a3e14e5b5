use std::sync::{mpsc, Arc};
use std::time::Duration;

use bytes::Bytes;
use postlink_envelope::{RequestId, Route};
use postlink_transport::Origin;
use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::layer::{InboundRequest, RpcShared};

pub(crate) type CallOutcome = Result<(Value, Vec<Bytes>)>;

/// An in-flight outbound call awaiting its correlated response.
pub struct PendingCall {
    request_id: RequestId,
    rx: mpsc::Receiver<CallOutcome>,
}

impl PendingCall {
    pub(crate) fn new(request_id: RequestId, rx: mpsc::Receiver<CallOutcome>) -> Self {
        Self { request_id, rx }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Block until the response arrives or the connection goes away.
    pub fn wait(self) -> Result<(Value, Vec<Bytes>)> {
        self.rx
            .recv()
            .map_err(|_| RpcError::InvalidState("call abandoned without settlement".to_string()))?
    }

    /// Like [`PendingCall::wait`], but give up after `timeout`.
    ///
    /// Timing out does not cancel anything on the peer; a late response is
    /// dropped when it arrives.
    pub fn wait_timeout(self, timeout: Duration) -> Result<(Value, Vec<Bytes>)> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(RpcError::ResponseTimeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(RpcError::InvalidState(
                "call abandoned without settlement".to_string(),
            )),
        }
    }
}

/// An inbound request taken off the queue, with the means to answer it.
///
/// Responding consumes the request, so every request is answered at most
/// once.
pub struct ReceivedRequest {
    shared: Arc<RpcShared>,
    request_id: RequestId,
    peer_origin: Origin,
    route: Route,
    payload: Value,
    attachments: Vec<Bytes>,
}

impl ReceivedRequest {
    pub(crate) fn new(shared: Arc<RpcShared>, inbound: InboundRequest) -> Self {
        Self {
            shared,
            request_id: inbound.request_id,
            peer_origin: inbound.peer_origin,
            route: inbound.route,
            payload: inbound.payload,
            attachments: inbound.attachments,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Authenticated origin of the document that made this request.
    pub fn peer_origin(&self) -> &Origin {
        &self.peer_origin
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn attachments(&self) -> &[Bytes] {
        &self.attachments
    }

    /// Send the correlated response back to the caller.
    pub fn respond(self, payload: Value, attachments: Vec<Bytes>) -> Result<()> {
        self.shared
            .connection
            .send_response(self.request_id, payload, attachments)
            .map_err(RpcError::from)
    }

    /// Tear down the whole connection, for requests that should never have
    /// been made.
    pub fn close_connection(&self) {
        self.shared.connection.close();
    }
}
