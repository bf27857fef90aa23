//! Configuration Provider Trait

use serde::de::DeserializeOwned;

use super::{ConfigError, ConfigResult};

/// Core configuration provider trait.
///
/// Lookups are synchronous: the registry reads its configuration once, while
/// it is being built, and may be built from a `OnceLock` initializer.
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Get a raw configuration value
    fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;

    /// List keys matching a prefix
    fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>>;
}

/// Extension methods for typed configuration access
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a value parsed as JSON, falling back to the raw string for
    /// string targets.
    fn get<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(json_err) => serde_json::from_value(serde_json::Value::String(raw))
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: json_err.to_string(),
                }),
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}
