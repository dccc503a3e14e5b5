use serde_json::{json, Map, Value};

use crate::route::{RequestId, Route};
use crate::secret::Secret;

/// Literal domain marker carried by every protocol message.
///
/// Distinguishes protocol traffic from unrelated messages sharing the same
/// transport; anything without it is ignored, not rejected with an error.
pub const DOMAIN: &str = "postlink";

/// A wire-level protocol message, discriminated by its `kind` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Child-side handshake opener, posted with a wildcard target.
    HandshakeInit { secret: Secret },
    /// Parent-side handshake reply echoing the child's secret.
    HandshakeComplete { secret: Secret },
    /// Liveness probe.
    Ping,
    /// Liveness probe reply.
    Pong,
    /// Peer-initiated close notification.
    ConnectionClosed,
    /// Fire-and-forget application message. Payload is opaque here.
    Common { payload: Value },
    /// A request expecting a correlated `Response`.
    Request {
        request_id: RequestId,
        route: Route,
        payload: Value,
    },
    /// The correlated reply to a `Request`.
    Response {
        request_id: RequestId,
        payload: Value,
    },
}

impl Envelope {
    /// Validate an inbound wire value against the exact shape of its `kind`.
    ///
    /// Total: returns `None` for anything that is not precisely one of the
    /// protocol shapes — wrong domain, unknown kind, unexpected extra
    /// fields, malformed secrets/ids/routes. Callers discard `None`
    /// silently so unrelated window traffic cannot destabilize the
    /// protocol.
    pub fn parse(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get("domain")?.as_str()? != DOMAIN {
            return None;
        }

        match obj.get("kind")?.as_str()? {
            "HandshakeInit" => {
                only_keys(obj, &["domain", "kind", "secret"])?;
                Some(Self::HandshakeInit {
                    secret: parse_field(obj, "secret")?,
                })
            }
            "HandshakeComplete" => {
                only_keys(obj, &["domain", "kind", "secret"])?;
                Some(Self::HandshakeComplete {
                    secret: parse_field(obj, "secret")?,
                })
            }
            "Ping" => {
                only_keys(obj, &["domain", "kind"])?;
                Some(Self::Ping)
            }
            "Pong" => {
                only_keys(obj, &["domain", "kind"])?;
                Some(Self::Pong)
            }
            "ConnectionClosed" => {
                only_keys(obj, &["domain", "kind"])?;
                Some(Self::ConnectionClosed)
            }
            "Common" => {
                only_keys(obj, &["domain", "kind", "payload"])?;
                Some(Self::Common {
                    payload: payload_or_null(obj),
                })
            }
            "Request" => {
                only_keys(obj, &["domain", "kind", "requestId", "route", "payload"])?;
                Some(Self::Request {
                    request_id: parse_field(obj, "requestId")?,
                    route: parse_field(obj, "route")?,
                    payload: payload_or_null(obj),
                })
            }
            "Response" => {
                only_keys(obj, &["domain", "kind", "requestId", "payload"])?;
                Some(Self::Response {
                    request_id: parse_field(obj, "requestId")?,
                    payload: payload_or_null(obj),
                })
            }
            _ => None,
        }
    }

    /// Encode this envelope as a wire value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::HandshakeInit { secret } => json!({
                "domain": DOMAIN,
                "kind": "HandshakeInit",
                "secret": secret,
            }),
            Self::HandshakeComplete { secret } => json!({
                "domain": DOMAIN,
                "kind": "HandshakeComplete",
                "secret": secret,
            }),
            Self::Ping => json!({ "domain": DOMAIN, "kind": "Ping" }),
            Self::Pong => json!({ "domain": DOMAIN, "kind": "Pong" }),
            Self::ConnectionClosed => json!({ "domain": DOMAIN, "kind": "ConnectionClosed" }),
            Self::Common { payload } => json!({
                "domain": DOMAIN,
                "kind": "Common",
                "payload": payload,
            }),
            Self::Request {
                request_id,
                route,
                payload,
            } => json!({
                "domain": DOMAIN,
                "kind": "Request",
                "requestId": request_id,
                "route": route,
                "payload": payload,
            }),
            Self::Response {
                request_id,
                payload,
            } => json!({
                "domain": DOMAIN,
                "kind": "Response",
                "requestId": request_id,
                "payload": payload,
            }),
        }
    }

    /// The wire name of this envelope's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HandshakeInit { .. } => "HandshakeInit",
            Self::HandshakeComplete { .. } => "HandshakeComplete",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::Common { .. } => "Common",
            Self::Request { .. } => "Request",
            Self::Response { .. } => "Response",
        }
    }
}

/// Strict-shape check: every present key must be in `allowed`.
fn only_keys(obj: &Map<String, Value>, allowed: &[&str]) -> Option<()> {
    obj.keys()
        .all(|key| allowed.contains(&key.as_str()))
        .then_some(())
}

fn parse_field<T: serde::de::DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    serde_json::from_value(obj.get(key)?.clone()).ok()
}

fn payload_or_null(obj: &Map<String, Value>) -> Value {
    obj.get("payload").cloned().unwrap_or(Value::Null)
}
