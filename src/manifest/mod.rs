//! Plugin manifests (`plugInfo.json`).
//!
//! A manifest is a JSON document, with `#` line comments allowed, holding an
//! optional `Includes` list and a `Plugins` list:
//!
//! ```text
//! # plugins/plugInfo.json
//! {
//!     "Includes": [ "*/resources/", "extra/**/plugInfo.json" ],
//!     "Plugins": [
//!         {
//!             "Type": "library",
//!             "Name": "geom",
//!             "Root": "..",
//!             "LibraryPath": "lib/libgeom.so",
//!             "ResourcePath": "resources",
//!             "Info": {
//!                 "Types": {
//!                     "Sphere": { "bases": ["Shape"], "displayName": "Sphere" }
//!                 }
//!             }
//!         }
//!     ]
//! }
//! ```
//!
//! [`ManifestResolver`] expands includes and globs and flattens everything
//! reachable from a set of paths into an ordered list of [`PluginDescriptor`]s.

mod comments;
mod descriptor;
mod glob;
mod resolver;

use std::path::{Path, PathBuf};

use serde_json::Value;

pub use descriptor::{PluginDescriptor, PluginKind};
pub(crate) use descriptor::join_lexically;
pub use resolver::{ManifestResolver, Resolution};

/// File name appended to directory paths.
pub const DEFAULT_MANIFEST_FILE: &str = "plugInfo.json";

const KEY_INCLUDES: &str = "Includes";
const KEY_PLUGINS: &str = "Plugins";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Manifest {path}: {} is missing required field '{field}'", plugin.as_deref().map(|p| format!("plugin '{p}'")).unwrap_or_else(|| "plugin entry".into()))]
    MissingField {
        path: PathBuf,
        plugin: Option<String>,
        field: &'static str,
    },

    #[error("Manifest {path}: invalid '{field}': {reason}")]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },

    #[error("Invalid include pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Include depth limit ({max}) exceeded at {path}")]
    IncludeDepthExceeded { path: PathBuf, max: usize },
}

impl ManifestError {
    /// Manifest the error refers to, when there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ManifestError::Read { path, .. }
            | ManifestError::Parse { path, .. }
            | ManifestError::MissingField { path, .. }
            | ManifestError::InvalidField { path, .. }
            | ManifestError::IncludeDepthExceeded { path, .. } => Some(path),
            ManifestError::InvalidPattern { .. } => None,
        }
    }
}

/// One parsed manifest file.
#[derive(Debug, Default)]
pub struct Manifest {
    pub path: PathBuf,
    /// Raw include directives, unresolved.
    pub includes: Vec<String>,
    /// Valid plugin entries in document order.
    pub plugins: Vec<PluginDescriptor>,
    /// Entries that were skipped, with the reason.
    pub rejected: Vec<ManifestError>,
}

impl Manifest {
    /// Parses manifest text. `path` is the manifest's own location and is
    /// used to resolve relative paths in its entries.
    ///
    /// A malformed document is an error; a malformed plugin entry only lands
    /// in [`Manifest::rejected`].
    pub fn parse(text: &str, path: &Path) -> Result<Self, ManifestError> {
        let stripped = comments::strip_comments(text);
        let document: Value = serde_json::from_str(&stripped).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let Value::Object(top) = document else {
            return Err(ManifestError::Parse {
                path: path.to_path_buf(),
                reason: "top level must be an object".into(),
            });
        };

        let mut manifest = Manifest {
            path: path.to_path_buf(),
            ..Default::default()
        };

        let has_sections = top.contains_key(KEY_INCLUDES) || top.contains_key(KEY_PLUGINS);
        if !has_sections {
            if PluginDescriptor::is_plugin_shaped(&top) {
                manifest.push_entry(&Value::Object(top));
            }
            return Ok(manifest);
        }

        match top.get(KEY_INCLUDES) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    match item.as_str() {
                        Some(include) => manifest.includes.push(include.to_string()),
                        None => manifest.rejected.push(ManifestError::InvalidField {
                            path: path.to_path_buf(),
                            field: "Includes",
                            reason: format!("expected a string, found {item}"),
                        }),
                    }
                }
            }
            Some(_) => manifest.rejected.push(ManifestError::InvalidField {
                path: path.to_path_buf(),
                field: "Includes",
                reason: "expected an array of paths".into(),
            }),
        }

        match top.get(KEY_PLUGINS) {
            None | Some(Value::Null) => {}
            Some(Value::Array(entries)) => {
                for entry in entries {
                    manifest.push_entry(entry);
                }
            }
            Some(_) => manifest.rejected.push(ManifestError::InvalidField {
                path: path.to_path_buf(),
                field: "Plugins",
                reason: "expected an array of plugin objects".into(),
            }),
        }

        Ok(manifest)
    }

    /// Reads and parses the manifest file at `path`.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn push_entry(&mut self, entry: &Value) {
        match PluginDescriptor::from_value(entry, &self.path) {
            Ok(descriptor) => self.plugins.push(descriptor),
            Err(e) => self.rejected.push(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> PathBuf {
        PathBuf::from("/p/plugInfo.json")
    }

    #[test]
    fn test_parse_full_manifest_with_comments() {
        let text = r#"
        # top comment
        {
            "Includes": ["sub/", "*/plugInfo.json"],  # two includes
            "Plugins": [
                {"Type": "resource", "Name": "a"},
                {"Type": "library", "Name": "b", "LibraryPath": "libb.so"}
            ]
        }
        "#;
        let manifest = Manifest::parse(text, &path()).unwrap();
        assert_eq!(manifest.includes, vec!["sub/", "*/plugInfo.json"]);
        assert_eq!(manifest.plugins.len(), 2);
        assert_eq!(manifest.plugins[1].library_path, PathBuf::from("/p/libb.so"));
        assert!(manifest.rejected.is_empty());
    }

    #[test]
    fn test_shorthand_single_plugin() {
        let text = r#"{"Type": "resource", "Name": "solo", "ResourcePath": "res"}"#;
        let manifest = Manifest::parse(text, &path()).unwrap();
        assert_eq!(manifest.plugins.len(), 1);
        assert_eq!(manifest.plugins[0].name, "solo");
        assert_eq!(manifest.plugins[0].resource_path, PathBuf::from("/p/res"));
    }

    #[test]
    fn test_empty_object_has_nothing() {
        let manifest = Manifest::parse("{}", &path()).unwrap();
        assert!(manifest.plugins.is_empty());
        assert!(manifest.includes.is_empty());
    }

    #[test]
    fn test_bad_entry_is_rejected_not_fatal() {
        let text = r#"{"Plugins": [
            {"Type": "library", "Name": "nolib"},
            {"Type": "resource", "Name": "ok"}
        ]}"#;
        let manifest = Manifest::parse(text, &path()).unwrap();
        assert_eq!(manifest.plugins.len(), 1);
        assert_eq!(manifest.plugins[0].name, "ok");
        assert_eq!(manifest.rejected.len(), 1);
        assert!(matches!(
            manifest.rejected[0],
            ManifestError::MissingField { field: "LibraryPath", .. }
        ));
    }

    #[test]
    fn test_malformed_document() {
        let err = Manifest::parse("{ not json", &path()).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
        assert_eq!(err.path(), Some(Path::new("/p/plugInfo.json")));

        let err = Manifest::parse("[1, 2]", &path()).unwrap_err();
        assert!(err.to_string().contains("top level must be an object"));
    }

    #[test]
    fn test_missing_field_message() {
        let err = ManifestError::MissingField {
            path: path(),
            plugin: Some("geom".into()),
            field: "LibraryPath",
        };
        let msg = err.to_string();
        assert!(msg.contains("plugin 'geom'"));
        assert!(msg.contains("LibraryPath"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Manifest::load(Path::new("/no/such/plugInfo.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
    }
}
