//! File-based Configuration Provider
//!
//! Reads settings from a JSON file. Nested objects are addressed with dot
//! keys (`plugin.path`).

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// File-based configuration provider
pub struct FileConfigProvider {
    path: PathBuf,
    /// Cached document, read on first access.
    data: RwLock<Option<Map<String, Value>>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: RwLock::new(None),
        }
    }

    /// Missing files read as empty.
    fn load(&self) -> ConfigResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(ConfigError::Provider {
                message: format!("{}: top level must be an object", self.path.display()),
            }),
        }
    }

    fn with_data<T>(&self, f: impl FnOnce(&Map<String, Value>) -> T) -> ConfigResult<T> {
        {
            let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(map) = &*data {
                return Ok(f(map));
            }
        }
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.is_none() {
            *data = Some(self.load()?);
        }
        Ok(f(data.get_or_insert_with(Map::new)))
    }

    /// Re-reads the file, replacing the cached document.
    pub fn reload(&self) -> ConfigResult<()> {
        let fresh = self.load()?;
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = Some(fresh);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let first = map.get(parts.next()?)?;
    parts.try_fold(first, |current, part| current.get(part))
}

fn collect_keys(prefix: &str, map: &Map<String, Value>, out: &mut Vec<String>) {
    for (key, value) in map {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => collect_keys(&full, inner, out),
            _ => out.push(full),
        }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        self.with_data(|map| match lookup(map, key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(v) => Some(v.to_string()),
        })
    }

    fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        self.with_data(|map| {
            let mut keys = Vec::new();
            collect_keys("", map, &mut keys);
            keys.retain(|k| k.starts_with(prefix));
            keys
        })
    }
}

impl std::fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfigProvider")
            .field("path", &self.path)
            .finish()
    }
}
