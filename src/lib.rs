//! # plugin-catalog
//!
//! Plugin discovery, type registration and lazy dynamic loading.
//!
//! Plugins describe themselves in `plugInfo.json` manifests. Registering a
//! set of paths reads those manifests, follows their includes, records one
//! [`Plugin`] per entry and declares every type the plugins advertise. No
//! plugin code runs until something asks for it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plugin_catalog::PlugRegistry;
//!
//! fn main() -> Result<(), plugin_catalog::Error> {
//!     let registry = PlugRegistry::new();
//!     let added = registry.register_plugins(&["/opt/app/plugins/"]);
//!     println!("registered {} plugins", added.len());
//!
//!     for ty in registry.all_derived_types("Shape") {
//!         let name = registry.string_from_plugin_metadata(ty.name(), "displayName");
//!         println!("{ty}: {}", name.unwrap_or_default());
//!     }
//!
//!     let sphere = registry.demand_plugin_for_type("Sphere")?;
//!     assert!(sphere.is_loaded());
//!     Ok(())
//! }
//! ```
//!
//! ## Process-wide registry
//!
//! [`PlugRegistry::global`] builds one registry on first use from `PLUG_*`
//! environment settings (see [`config::settings`]). Install a customised one
//! up front with [`PlugRegistry::init_global`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod manifest;
pub mod observability;
pub mod plugins;
pub mod prelude;
pub mod type_system;

// Re-exports for convenience
pub use config::{ConfigBuilder, ConfigError, ConfigProvider, ConfigProviderExt, RegistryConfig};
pub use manifest::{
    DEFAULT_MANIFEST_FILE, Manifest, ManifestError, ManifestResolver, PluginDescriptor,
    PluginKind, Resolution,
};
pub use observability::{MetricsSummary, RegistryMetrics};
pub use plugins::{
    Backends, DependencyDiagnostic, DependencyEdge, LibraryBackend, LoadState, LoaderBackend,
    PlugRegistry, PlugRegistryBuilder, Plugin, PluginError, PluginId, PluginsRegistered,
    RegistrationError, RegistrationListener, RegistrationReport, ResourceBackend, ScriptBackend,
    ScriptImporter,
};
pub use type_system::{
    DeclaredType, InMemoryTypeRegistry, TypeAlias, TypeFactory, TypeHandle, TypeSystem,
};

/// Error type for plugin-catalog operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A manifest could not be read or understood.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Registration, lookup or loading failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Manifests, settings or conflicting registrations
    Configuration,
    /// A prerequisite plugin failed or is missing
    Dependency,
    /// Plugin code failed to load; a later attempt may succeed
    Load,
    /// Registry lifecycle and background task failures
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Manifest(_) | Error::Config(_) => ErrorCategory::Configuration,
            Error::Plugin(e) => match e {
                PluginError::ConflictingRegistration { .. }
                | PluginError::UnknownType { .. }
                | PluginError::NoFactory { .. } => ErrorCategory::Configuration,
                PluginError::DependencyFailed { .. } => ErrorCategory::Dependency,
                PluginError::Load { .. } => ErrorCategory::Load,
                PluginError::RegistryDropped
                | PluginError::GlobalAlreadyInitialized
                | PluginError::Task(_) => ErrorCategory::Internal,
            },
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Failed loads leave the plugin unloaded, so calling `load` again
    /// retries the backend.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Load | ErrorCategory::Dependency
        )
    }
}

impl From<RegistrationError> for Error {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::Manifest(e) => Error::Manifest(e),
            RegistrationError::Plugin(e) => Error::Plugin(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
