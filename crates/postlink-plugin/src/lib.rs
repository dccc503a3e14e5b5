//! Capability registry for composing named, mutually-dependent plugins.
//!
//! A [`Base`] is built once from a fixed set of plugins and is immutable
//! afterwards. Construction hands every plugin a non-owning back-reference
//! to the registry, then runs each plugin's initializer in the order
//! supplied; an initializer that asserts a missing capability fails the
//! whole construction immediately, surfacing wiring mistakes at startup
//! rather than at first use. Plugins talk to each other only through the
//! registry lookup, never through direct references.

pub mod base;
pub mod error;

pub use base::{Base, BaseRef, Plugin};
pub use error::{PluginError, Result};
