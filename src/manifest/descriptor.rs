use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ManifestError;

pub(crate) const KEY_TYPE: &str = "Type";
pub(crate) const KEY_NAME: &str = "Name";
pub(crate) const KEY_ROOT: &str = "Root";
pub(crate) const KEY_LIBRARY_PATH: &str = "LibraryPath";
pub(crate) const KEY_RESOURCE_PATH: &str = "ResourcePath";
pub(crate) const KEY_INFO: &str = "Info";

/// How a plugin's content is brought into the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// A shared library opened with the platform loader.
    Library,
    /// A script module imported by name.
    #[serde(rename = "python", alias = "script")]
    Script,
    /// Resources only; nothing to load.
    Resource,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Library => "library",
            PluginKind::Script => "python",
            PluginKind::Resource => "resource",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "library" => Ok(PluginKind::Library),
            "python" | "script" => Ok(PluginKind::Script),
            "resource" => Ok(PluginKind::Resource),
            other => Err(format!(
                "unknown plugin type '{other}', expected one of: library, python, resource"
            )),
        }
    }
}

/// One plugin entry of a manifest with every path made absolute.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub kind: PluginKind,
    pub name: String,
    /// Manifest file the entry came from.
    pub manifest_path: PathBuf,
    /// `Root`, resolved against the manifest's directory.
    pub root: PathBuf,
    /// `LibraryPath`, resolved against `root`. Empty unless `kind` is `Library`.
    pub library_path: PathBuf,
    /// `ResourcePath`, resolved against `root`.
    pub resource_path: PathBuf,
    /// The free-form `Info` document.
    pub info: Map<String, Value>,
}

impl PluginDescriptor {
    /// Builds a descriptor from one plugin object of the manifest at
    /// `manifest_path`.
    pub fn from_value(value: &Value, manifest_path: &Path) -> Result<Self, ManifestError> {
        let object = value.as_object().ok_or_else(|| ManifestError::InvalidField {
            path: manifest_path.to_path_buf(),
            field: "Plugins",
            reason: "plugin entries must be objects".into(),
        })?;

        let name = required_str(object, KEY_NAME, manifest_path, None)?;
        let kind_str = required_str(object, KEY_TYPE, manifest_path, Some(name))?;
        let kind = PluginKind::from_str(kind_str).map_err(|reason| ManifestError::InvalidField {
            path: manifest_path.to_path_buf(),
            field: KEY_TYPE,
            reason: format!("plugin '{name}': {reason}"),
        })?;

        let manifest_dir = manifest_path.parent().unwrap_or_else(|| Path::new(""));
        let root = match optional_str(object, KEY_ROOT, manifest_path)? {
            Some(root) => join_lexically(manifest_dir, root),
            None => manifest_dir.to_path_buf(),
        };

        let library_path = match (kind, optional_str(object, KEY_LIBRARY_PATH, manifest_path)?) {
            (PluginKind::Library, Some(lib)) if !lib.is_empty() => join_lexically(&root, lib),
            (PluginKind::Library, _) => {
                return Err(ManifestError::MissingField {
                    path: manifest_path.to_path_buf(),
                    plugin: Some(name.to_string()),
                    field: KEY_LIBRARY_PATH,
                });
            }
            _ => PathBuf::new(),
        };

        let resource_path = match optional_str(object, KEY_RESOURCE_PATH, manifest_path)? {
            Some(res) => join_lexically(&root, res),
            None => root.clone(),
        };

        let info = match object.get(KEY_INFO) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(info)) => info.clone(),
            Some(_) => {
                return Err(ManifestError::InvalidField {
                    path: manifest_path.to_path_buf(),
                    field: KEY_INFO,
                    reason: format!("plugin '{name}': Info must be an object"),
                });
            }
        };

        Ok(Self {
            kind,
            name: name.to_string(),
            manifest_path: manifest_path.to_path_buf(),
            root,
            library_path,
            resource_path,
            info,
        })
    }

    /// True when `object` looks like a plugin entry rather than a manifest.
    pub(crate) fn is_plugin_shaped(object: &Map<String, Value>) -> bool {
        object.contains_key(KEY_NAME) || object.contains_key(KEY_TYPE)
    }
}

fn required_str<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
    manifest_path: &Path,
    plugin: Option<&str>,
) -> Result<&'a str, ManifestError> {
    match object.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) | None => Err(ManifestError::MissingField {
            path: manifest_path.to_path_buf(),
            plugin: plugin.map(str::to_string),
            field,
        }),
        Some(_) => Err(ManifestError::InvalidField {
            path: manifest_path.to_path_buf(),
            field,
            reason: "expected a string".into(),
        }),
    }
}

fn optional_str<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
    manifest_path: &Path,
) -> Result<Option<&'a str>, ManifestError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ManifestError::InvalidField {
            path: manifest_path.to_path_buf(),
            field,
            reason: "expected a string".into(),
        }),
    }
}

/// Joins `path` onto `base` (absolute `path` wins) and folds `.` and `..`
/// without touching the filesystem.
pub(crate) fn join_lexically(base: &Path, path: impl AsRef<Path>) -> PathBuf {
    use std::path::Component;

    let joined = base.join(path);
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> PathBuf {
        PathBuf::from("/plugins/geom/plugInfo.json")
    }

    #[test]
    fn test_library_descriptor_paths() {
        let value = json!({
            "Type": "library",
            "Name": "geom",
            "Root": "..",
            "LibraryPath": "lib/libgeom.so",
            "ResourcePath": "resources",
            "Info": {"Types": {}}
        });
        let desc = PluginDescriptor::from_value(&value, &manifest()).unwrap();
        assert_eq!(desc.kind, PluginKind::Library);
        assert_eq!(desc.name, "geom");
        assert_eq!(desc.root, PathBuf::from("/plugins"));
        assert_eq!(desc.library_path, PathBuf::from("/plugins/lib/libgeom.so"));
        assert_eq!(desc.resource_path, PathBuf::from("/plugins/resources"));
        assert!(desc.info.contains_key("Types"));
    }

    #[test]
    fn test_defaults_for_resource_plugin() {
        let value = json!({"Type": "resource", "Name": "shaders"});
        let desc = PluginDescriptor::from_value(&value, &manifest()).unwrap();
        assert_eq!(desc.root, PathBuf::from("/plugins/geom"));
        assert_eq!(desc.resource_path, PathBuf::from("/plugins/geom"));
        assert!(desc.library_path.as_os_str().is_empty());
        assert!(desc.info.is_empty());
    }

    #[test]
    fn test_python_and_script_kinds() {
        for kind in ["python", "script"] {
            let value = json!({"Type": kind, "Name": "geomPy"});
            let desc = PluginDescriptor::from_value(&value, &manifest()).unwrap();
            assert_eq!(desc.kind, PluginKind::Script);
        }
    }

    #[test]
    fn test_library_requires_library_path() {
        let value = json!({"Type": "library", "Name": "nolib"});
        let err = PluginDescriptor::from_value(&value, &manifest()).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingField { field: "LibraryPath", ref plugin, .. } if plugin.as_deref() == Some("nolib")
        ));
    }

    #[test]
    fn test_missing_name_and_bad_type() {
        let err = PluginDescriptor::from_value(&json!({"Type": "library"}), &manifest()).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField { field: "Name", .. }));

        let err = PluginDescriptor::from_value(&json!({"Type": "dylib", "Name": "x"}), &manifest())
            .unwrap_err();
        assert!(err.to_string().contains("unknown plugin type 'dylib'"));
    }

    #[test]
    fn test_absolute_root_is_kept() {
        let value = json!({"Type": "resource", "Name": "abs", "Root": "/opt/abs"});
        let desc = PluginDescriptor::from_value(&value, &manifest()).unwrap();
        assert_eq!(desc.root, PathBuf::from("/opt/abs"));
    }

    #[test]
    fn test_join_lexically() {
        assert_eq!(
            join_lexically(Path::new("/a/b"), "../c/./d"),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(join_lexically(Path::new("/a"), "/x/y"), PathBuf::from("/x/y"));
    }

    #[test]
    fn test_kind_display_roundtrip() {
        for kind in [PluginKind::Library, PluginKind::Script, PluginKind::Resource] {
            assert_eq!(kind.to_string().parse::<PluginKind>().unwrap(), kind);
        }
    }
}
