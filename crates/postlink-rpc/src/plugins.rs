//! Registry capabilities wrapping the connection and the calling layer.

use std::any::Any;
use std::sync::{Arc, OnceLock, Weak};

use postlink_connection::Connection;
use postlink_plugin::{Base, BaseRef, Plugin, PluginError};

use crate::layer::RpcLayer;

/// Registry name of the connection capability.
pub const CONNECTION_PLUGIN: &str = "connection";

/// Registry name of the request/response capability.
pub const RPC_PLUGIN: &str = "rpc";

/// Exposes an established [`Connection`] to the rest of a registry.
pub struct ConnectionPlugin {
    base: BaseRef,
    connection: Connection,
}

impl ConnectionPlugin {
    pub fn new(connection: Connection) -> Arc<Self> {
        Arc::new(Self {
            base: BaseRef::new(),
            connection,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Plugin for ConnectionPlugin {
    fn name(&self) -> &'static str {
        CONNECTION_PLUGIN
    }

    fn install(&self, base: Weak<Base>) {
        self.base.install(base);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Builds an [`RpcLayer`] over the registry's connection capability.
///
/// Declares a hard dependency on [`ConnectionPlugin`]; registry
/// construction fails without one.
pub struct RpcPlugin {
    base: BaseRef,
    layer: OnceLock<RpcLayer>,
}

impl RpcPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: BaseRef::new(),
            layer: OnceLock::new(),
        })
    }

    /// The calling layer. Available once the registry is built.
    pub fn layer(&self) -> postlink_plugin::Result<RpcLayer> {
        self.layer.get().cloned().ok_or(PluginError::NotInstalled)
    }
}

impl Plugin for RpcPlugin {
    fn name(&self) -> &'static str {
        RPC_PLUGIN
    }

    fn install(&self, base: Weak<Base>) {
        self.base.install(base);
    }

    fn init(&self) -> postlink_plugin::Result<()> {
        let base = self.base.base()?;
        base.assert_has_plugin(CONNECTION_PLUGIN)?;
        let connection = base.plugin::<ConnectionPlugin>(CONNECTION_PLUGIN)?;
        let _ = self.layer.set(RpcLayer::new(connection.connection().clone()));
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_plugin_requires_a_connection_plugin() {
        let result = Base::new(vec![RpcPlugin::new()]);
        assert!(matches!(
            result,
            Err(PluginError::MissingDependency(name)) if name == CONNECTION_PLUGIN
        ));
    }

    #[test]
    fn layer_before_installation_reports_not_installed() {
        let plugin = RpcPlugin::new();
        assert!(matches!(plugin.layer(), Err(PluginError::NotInstalled)));
    }
}
