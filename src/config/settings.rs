//! Registry settings.
//!
//! | Key | Environment | Default |
//! | --- | --- | --- |
//! | `plugin.path` | `PLUG_PLUGIN_PATH` | none |
//! | `manifest.file.name` | `PLUG_MANIFEST_FILE_NAME` | `plugInfo.json` |
//! | `library.entry.symbol` | `PLUG_LIBRARY_ENTRY_SYMBOL` | `plug_module_init` |
//! | `max.include.depth` | `PLUG_MAX_INCLUDE_DEPTH` | `64` |
//!
//! `plugin.path` is either a JSON array of paths or a list joined with the
//! platform path separator (`:` on Unix).

use std::path::PathBuf;

use super::provider::{ConfigProvider, ConfigProviderExt};
use super::{ConfigBuilder, ConfigError, ConfigResult};
use crate::manifest::DEFAULT_MANIFEST_FILE;
use crate::plugins::DEFAULT_ENTRY_SYMBOL;

pub const ENV_PREFIX: &str = "PLUG_";

pub const KEY_PLUGIN_PATH: &str = "plugin.path";
pub const KEY_MANIFEST_FILE_NAME: &str = "manifest.file.name";
pub const KEY_LIBRARY_ENTRY_SYMBOL: &str = "library.entry.symbol";
pub const KEY_MAX_INCLUDE_DEPTH: &str = "max.include.depth";

const DEFAULT_MAX_INCLUDE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Manifests registered when the registry is built.
    pub search_paths: Vec<PathBuf>,
    /// Appended to directory paths.
    pub manifest_file_name: String,
    /// Registration function looked up in each opened shared library.
    pub library_entry_symbol: String,
    pub max_include_depth: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            manifest_file_name: DEFAULT_MANIFEST_FILE.to_string(),
            library_entry_symbol: DEFAULT_ENTRY_SYMBOL.to_string(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `PLUG_*` environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        let provider = ConfigBuilder::new().env_with_prefix(ENV_PREFIX).build();
        Self::from_provider(&provider)
    }

    /// Reads every setting from `provider`, keeping defaults for absent keys.
    pub fn from_provider(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(raw) = provider.get_raw(KEY_PLUGIN_PATH)? {
            config.search_paths = parse_search_paths(&raw);
        }
        if let Some(name) = provider.get::<String>(KEY_MANIFEST_FILE_NAME)? {
            if name.is_empty() || name.contains(['/', std::path::MAIN_SEPARATOR]) {
                return Err(ConfigError::InvalidValue {
                    key: KEY_MANIFEST_FILE_NAME.to_string(),
                    message: format!("'{name}' is not a plain file name"),
                });
            }
            config.manifest_file_name = name;
        }
        if let Some(symbol) = provider.get::<String>(KEY_LIBRARY_ENTRY_SYMBOL)? {
            config.library_entry_symbol = symbol;
        }
        if let Some(depth) = provider.get::<usize>(KEY_MAX_INCLUDE_DEPTH)? {
            config.max_include_depth = depth;
        }

        tracing::debug!(
            search_paths = config.search_paths.len(),
            manifest_file_name = %config.manifest_file_name,
            max_include_depth = config.max_include_depth,
            "Loaded registry configuration"
        );
        Ok(config)
    }

    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn manifest_file_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_file_name = name.into();
        self
    }

    pub fn library_entry_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.library_entry_symbol = symbol.into();
        self
    }

    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }
}

fn parse_search_paths(raw: &str) -> Vec<PathBuf> {
    if raw.trim_start().starts_with('[')
        && let Ok(paths) = serde_json::from_str::<Vec<PathBuf>>(raw)
    {
        return paths;
    }
    std::env::split_paths(raw)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}
