use std::sync::Arc;
use std::time::Duration;

use postlink_transport::{Listener, Origin, PeerHandle};

use crate::error::{ConnectionError, Result};

/// How long an idle connection waits before probing the peer.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a connection tolerates total silence before closing itself.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the establish handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// Waits for an initiation and echoes its secret back.
    Parent,
    /// Generates the secret and initiates.
    Child,
}

/// Origin policy applied by the child when a handshake echo arrives.
///
/// The default is an empty allow-list, which accepts nobody; callers must
/// opt in to every peer they are willing to talk to (or explicitly choose
/// [`ConnectionFilter::allow_all`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFilter {
    /// Accept only the listed origins.
    Allow(Vec<Origin>),
    /// Accept every origin except the listed ones.
    Deny(Vec<Origin>),
}

impl Default for ConnectionFilter {
    fn default() -> Self {
        Self::Allow(Vec::new())
    }
}

impl ConnectionFilter {
    pub fn allow(origins: Vec<Origin>) -> Self {
        Self::Allow(origins)
    }

    pub fn deny(origins: Vec<Origin>) -> Self {
        Self::Deny(origins)
    }

    /// A filter that accepts any origin.
    pub fn allow_all() -> Self {
        Self::Deny(Vec::new())
    }

    /// Whether a peer at `origin` passes this policy.
    pub fn permits(&self, origin: &Origin) -> bool {
        match self {
            Self::Allow(list) => list.contains(origin),
            Self::Deny(list) => !list.contains(origin),
        }
    }
}

/// Heartbeat timings for an established connection.
///
/// The connection pings the peer after `ping_timeout` of receive silence
/// and gives up entirely after `connection_timeout` of receive silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub ping_timeout: Duration,
    pub connection_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_timeout: PING_TIMEOUT,
            connection_timeout: CONNECTION_TIMEOUT,
        }
    }
}

impl HeartbeatConfig {
    pub fn new(ping_timeout: Duration, connection_timeout: Duration) -> Self {
        Self {
            ping_timeout,
            connection_timeout,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.ping_timeout.is_zero() {
            return Err(ConnectionError::InvalidConfig(
                "ping timeout must be non-zero".to_string(),
            ));
        }
        if self.ping_timeout >= self.connection_timeout {
            return Err(ConnectionError::InvalidConfig(
                "ping timeout must be shorter than the connection timeout".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) enum EndpointMode {
    Parent { peer_origin: Origin },
    Child { filter: ConnectionFilter },
}

/// Everything [`Connection::establish`](crate::Connection::establish) needs.
///
/// Built with [`EstablishConfig::parent`] or [`EstablishConfig::child`] and
/// refined with the `with_*` methods.
pub struct EstablishConfig {
    pub(crate) peer: Arc<dyn PeerHandle>,
    pub(crate) listener: Arc<dyn Listener>,
    pub(crate) mode: EndpointMode,
    pub(crate) handshake_timeout: Duration,
    pub(crate) heartbeat: HeartbeatConfig,
    pub(crate) config_error: Option<String>,
}

impl EstablishConfig {
    /// A parent endpoint that will accept an initiation and address all
    /// further traffic to `peer_origin`.
    pub fn parent(
        peer: Arc<dyn PeerHandle>,
        listener: Arc<dyn Listener>,
        peer_origin: Origin,
    ) -> Self {
        Self {
            peer,
            listener,
            mode: EndpointMode::Parent { peer_origin },
            handshake_timeout: HANDSHAKE_TIMEOUT,
            heartbeat: HeartbeatConfig::default(),
            config_error: None,
        }
    }

    /// A child endpoint that will initiate the handshake. Starts with the
    /// default deny-everyone filter.
    pub fn child(peer: Arc<dyn PeerHandle>, listener: Arc<dyn Listener>) -> Self {
        Self {
            peer,
            listener,
            mode: EndpointMode::Child {
                filter: ConnectionFilter::default(),
            },
            handshake_timeout: HANDSHAKE_TIMEOUT,
            heartbeat: HeartbeatConfig::default(),
            config_error: None,
        }
    }

    /// Replace the child-side origin policy.
    pub fn with_connection_filter(mut self, filter: ConnectionFilter) -> Self {
        match &mut self.mode {
            EndpointMode::Child { filter: slot } => *slot = filter,
            EndpointMode::Parent { .. } => {
                self.config_error =
                    Some("a connection filter only applies to child endpoints".to_string());
            }
        }
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(message) = &self.config_error {
            return Err(ConnectionError::InvalidConfig(message.clone()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConnectionError::InvalidConfig(
                "handshake timeout must be non-zero".to_string(),
            ));
        }
        self.heartbeat.validate()
    }
}
