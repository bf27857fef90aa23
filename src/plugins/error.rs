use std::path::PathBuf;

use crate::manifest::{ManifestError, PluginKind};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("Failed to load plugin '{plugin}': {message}")]
    Load { plugin: String, message: String },

    #[error("Plugin '{plugin}' not loaded: dependency '{dependency}' failed: {message}")]
    DependencyFailed {
        plugin: String,
        dependency: String,
        message: String,
    },

    #[error(
        "Plugin '{name}' already registered as {existing_kind} at {existing_path}, ignoring {kind} at {path}"
    )]
    ConflictingRegistration {
        name: String,
        existing_kind: PluginKind,
        existing_path: PathBuf,
        kind: PluginKind,
        path: PathBuf,
    },

    #[error("No plugin provides type '{type_name}'")]
    UnknownType { type_name: String },

    #[error("Type '{type_name}' has no factory after loading plugin '{plugin}'")]
    NoFactory { type_name: String, plugin: String },

    #[error("Plugin registry is no longer alive")]
    RegistryDropped,

    #[error("Global plugin registry is already initialized")]
    GlobalAlreadyInitialized,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl PluginError {
    pub fn load(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for PluginError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Manifest errors keep their own type; registration reports carry both.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}
