/// Errors that can occur when composing or using a plugin registry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// A plugin declared a dependency on a capability that is not present
    /// in the registry.
    #[error("no plugin named '{0}' found")]
    MissingDependency(String),

    /// A capability is present but has a different concrete type than the
    /// caller asked for.
    #[error("plugin '{0}' has an unexpected type")]
    TypeMismatch(String),

    /// Two plugins were registered under the same name.
    #[error("duplicate plugin name '{0}'")]
    DuplicateName(String),

    /// A plugin was used before its registry installed it.
    #[error("the plugin is not installed")]
    NotInstalled,
}

pub type Result<T> = std::result::Result<T, PluginError>;
