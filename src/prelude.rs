//! Prelude module for convenient imports.
//!
//! ```rust
//! use plugin_catalog::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::Result;

// Registry
pub use crate::plugins::{
    LoadState, PlugRegistry, PlugRegistryBuilder, Plugin, PluginError, PluginId,
    PluginsRegistered, RegistrationListener,
};

// Loading
pub use crate::plugins::{Backends, LoaderBackend};

// Manifests
pub use crate::manifest::{ManifestResolver, PluginKind};

// Types
pub use crate::type_system::{TypeFactory, TypeHandle, TypeSystem};

// Configuration
pub use crate::config::RegistryConfig;
