//! Plugin catalog and lazy loading.
//!
//! A [`PlugRegistry`] turns manifests into [`Plugin`] records and declares
//! every type they advertise, without running any plugin code. Code is
//! brought in on demand:
//!
//! ```rust,no_run
//! use plugin_catalog::plugins::PlugRegistry;
//!
//! # fn example() -> Result<(), plugin_catalog::plugins::PluginError> {
//! let registry = PlugRegistry::new();
//! registry.register_plugins(&["/opt/app/plugins/"]);
//!
//! if let Some(plugin) = registry.plugin_for_type("Sphere") {
//!     plugin.load()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Loading first loads every plugin reached through `PluginDependencies`,
//! deepest first, then hands the plugin to the [`LoaderBackend`] for its
//! kind. Each plugin's backend runs at most once on success.

mod dependency;
mod error;
mod loader;
mod notice;
mod plugin;
mod registry;

pub use dependency::{
    DependencyDiagnostic, DependencyEdge, DependencyGraph, LoadOrder, resolve_load_order,
};
pub use error::{PluginError, RegistrationError};
#[cfg(feature = "python")]
pub use loader::PythonImporter;
pub use loader::{
    Backends, DEFAULT_ENTRY_SYMBOL, LibraryBackend, LoaderBackend, ResourceBackend, ScriptBackend,
    ScriptImporter, UnavailableImporter,
};
pub use notice::{PluginsRegistered, RegistrationListener};
pub use plugin::{LoadState, Plugin, PluginId};
pub use registry::{PlugRegistry, PlugRegistryBuilder, RegistrationReport};
