use std::any::Any;
use std::sync::{Arc, OnceLock, Weak};

use tracing::debug;

use crate::error::{PluginError, Result};

/// A named capability installable into a [`Base`].
///
/// Implementations keep a [`BaseRef`] field and wire it up in
/// [`Plugin::install`]; everything a plugin needs from its siblings goes
/// through that back-reference.
pub trait Plugin: Send + Sync + 'static {
    /// The capability name this plugin is registered under.
    fn name(&self) -> &'static str;

    /// Receive the non-owning back-reference to the registry.
    ///
    /// Called exactly once, before any initializer runs.
    fn install(&self, base: Weak<Base>);

    /// Initialize after every plugin is installed.
    ///
    /// This is the place to declare dependencies via
    /// [`Base::assert_has_plugin`].
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Type-erased handle for downcasting lookups.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Immutable-after-construction registry of named plugins.
///
/// The registry owns its plugins; plugins hold only a `Weak` reference
/// back. Iteration order of construction and initialization is the order
/// of the supplied list.
pub struct Base {
    plugins: Vec<(&'static str, Arc<dyn Plugin>)>,
}

impl Base {
    /// Build a registry: install every plugin, then initialize each in the
    /// supplied order.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Result<Arc<Self>> {
        let mut named: Vec<(&'static str, Arc<dyn Plugin>)> = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            let name = plugin.name();
            if named.iter().any(|(existing, _)| *existing == name) {
                return Err(PluginError::DuplicateName(name.to_string()));
            }
            named.push((name, plugin));
        }

        let base = Arc::new(Self { plugins: named });

        for (_, plugin) in &base.plugins {
            plugin.install(Arc::downgrade(&base));
        }
        for (name, plugin) in &base.plugins {
            plugin.init()?;
            debug!(plugin = name, "plugin initialized");
        }

        Ok(base)
    }

    /// Whether a capability with this name is registered.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|(existing, _)| *existing == name)
    }

    /// Declare a runtime dependency on a capability.
    pub fn assert_has_plugin(&self, name: &str) -> Result<()> {
        if self.has_plugin(name) {
            Ok(())
        } else {
            Err(PluginError::MissingDependency(name.to_string()))
        }
    }

    /// Look up a capability by name and concrete type.
    pub fn plugin<T: Plugin>(&self, name: &str) -> Result<Arc<T>> {
        let (_, plugin) = self
            .plugins
            .iter()
            .find(|(existing, _)| *existing == name)
            .ok_or_else(|| PluginError::MissingDependency(name.to_string()))?;

        plugin
            .clone()
            .as_any()
            .downcast::<T>()
            .map_err(|_| PluginError::TypeMismatch(name.to_string()))
    }

    /// Registered capability names, in registration order.
    pub fn plugin_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.iter().map(|(name, _)| *name)
    }
}

/// Reusable back-reference slot for plugin implementations.
///
/// Holds the `Weak` registry handle delivered by [`Plugin::install`] and
/// upgrades it on demand; the registry owns the plugins, never the other
/// way around.
#[derive(Default)]
pub struct BaseRef {
    slot: OnceLock<Weak<Base>>,
}

impl BaseRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the back-reference. Later installs are ignored.
    pub fn install(&self, base: Weak<Base>) {
        let _ = self.slot.set(base);
    }

    /// The owning registry, or [`PluginError::NotInstalled`] if this plugin
    /// was never installed or the registry is gone.
    pub fn base(&self) -> Result<Arc<Base>> {
        self.slot
            .get()
            .and_then(Weak::upgrade)
            .ok_or(PluginError::NotInstalled)
    }
}
