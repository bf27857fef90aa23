//! Include expansion and manifest flattening.

use std::collections::HashSet;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use super::glob::{IncludePattern, has_wildcards};
use super::{DEFAULT_MANIFEST_FILE, Manifest, ManifestError, PluginDescriptor, join_lexically};

const DEFAULT_MAX_INCLUDE_DEPTH: usize = 64;

/// Everything reachable from one resolution call.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Plugin entries in first-discovery order.
    pub plugins: Vec<PluginDescriptor>,
    /// Canonical paths of every manifest file that was parsed.
    pub manifests: Vec<PathBuf>,
    /// Malformed manifests and entries that were skipped.
    pub errors: Vec<ManifestError>,
}

#[derive(Debug, Clone)]
pub struct ManifestResolver {
    manifest_file_name: String,
    max_include_depth: usize,
}

impl Default for ManifestResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestResolver {
    pub fn new() -> Self {
        Self {
            manifest_file_name: DEFAULT_MANIFEST_FILE.to_string(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }

    pub fn with_manifest_file_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_file_name = name.into();
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    pub fn manifest_file_name(&self) -> &str {
        &self.manifest_file_name
    }

    /// Expands, parses and flattens the manifests named by `paths`.
    ///
    /// Each path may be a manifest file, a directory, or a pattern. A file is
    /// parsed at most once per call even if several includes reach it, which
    /// also breaks include cycles.
    pub fn resolve<P: AsRef<Path>>(&self, paths: &[P]) -> Resolution {
        self.resolve_excluding(paths, &HashSet::new())
    }

    /// Like [`ManifestResolver::resolve`], treating the canonical manifest
    /// paths in `known` as already parsed.
    pub fn resolve_excluding<P: AsRef<Path>>(
        &self,
        paths: &[P],
        known: &HashSet<PathBuf>,
    ) -> Resolution {
        let mut resolution = Resolution::default();
        let mut visited = known.clone();
        for path in paths {
            let path = path.as_ref();
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| join_lexically(&cwd, path))
                    .unwrap_or_else(|_| path.to_path_buf())
            };
            self.visit_spec(&absolute, 0, &mut visited, &mut resolution);
        }
        resolution
    }

    /// Handles one path that may still contain wildcards.
    fn visit_spec(
        &self,
        spec: &Path,
        depth: usize,
        visited: &mut HashSet<PathBuf>,
        resolution: &mut Resolution,
    ) {
        let spec = self.with_manifest_name(spec);
        if !has_wildcards(&spec.to_string_lossy()) {
            self.visit_file(&spec, depth, visited, resolution);
            return;
        }

        let pattern = match IncludePattern::new(&spec) {
            Ok(pattern) => pattern,
            Err(e) => {
                resolution.errors.push(e);
                return;
            }
        };
        let matches = pattern.expand();
        tracing::trace!(pattern = %spec.display(), matches = matches.len(), "Expanded include pattern");
        for matched in matches {
            let file = self.with_manifest_name(&matched);
            self.visit_file(&file, depth, visited, resolution);
        }
    }

    fn visit_file(
        &self,
        path: &Path,
        depth: usize,
        visited: &mut HashSet<PathBuf>,
        resolution: &mut Resolution,
    ) {
        let canonical = match std::fs::canonicalize(path) {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Manifest not found, skipping");
                return;
            }
        };
        if !canonical.is_file() {
            tracing::debug!(path = %canonical.display(), "Manifest path is not a file, skipping");
            return;
        }
        if !visited.insert(canonical.clone()) {
            tracing::trace!(path = %canonical.display(), "Manifest already visited");
            return;
        }

        let manifest = match Manifest::load(&canonical) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unusable manifest");
                resolution.errors.push(e);
                return;
            }
        };
        tracing::debug!(
            path = %canonical.display(),
            plugins = manifest.plugins.len(),
            includes = manifest.includes.len(),
            "Parsed plugin manifest"
        );

        resolution.manifests.push(canonical.clone());
        resolution.plugins.extend(manifest.plugins);
        resolution.errors.extend(manifest.rejected);

        if manifest.includes.is_empty() {
            return;
        }
        if depth >= self.max_include_depth {
            resolution.errors.push(ManifestError::IncludeDepthExceeded {
                path: canonical.clone(),
                max: self.max_include_depth,
            });
            return;
        }

        let manifest_dir = canonical.parent().unwrap_or_else(|| Path::new(""));
        for include in &manifest.includes {
            let target = self.include_target(manifest_dir, include);
            self.visit_spec(&target, depth + 1, visited, resolution);
        }
    }

    /// Resolves an include relative to the including manifest's directory,
    /// keeping a trailing separator so directory includes get the manifest
    /// name appended.
    fn include_target(&self, manifest_dir: &Path, include: &str) -> PathBuf {
        let joined = join_lexically(manifest_dir, include);
        if ends_with_separator(include) {
            joined.join(&self.manifest_file_name)
        } else {
            joined
        }
    }

    /// Appends the manifest file name to paths that name a directory.
    fn with_manifest_name(&self, path: &Path) -> PathBuf {
        if ends_with_separator(&path.to_string_lossy()) || path.is_dir() {
            path.join(&self.manifest_file_name)
        } else {
            path.to_path_buf()
        }
    }
}

fn ends_with_separator(path: &str) -> bool {
    path.ends_with('/') || path.ends_with(MAIN_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn resource(name: &str) -> String {
        format!(r#"{{"Plugins": [{{"Type": "resource", "Name": "{name}"}}]}}"#)
    }

    fn names(resolution: &Resolution) -> Vec<&str> {
        resolution.plugins.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_directory_path_appends_manifest_name() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("plugInfo.json"), &resource("dirplug"));

        let resolution = ManifestResolver::new().resolve(&[dir.path()]);
        assert_eq!(names(&resolution), vec!["dirplug"]);
        assert_eq!(resolution.manifests.len(), 1);
    }

    #[test]
    fn test_relative_and_directory_includes() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("plugInfo.json"),
            r#"{"Includes": ["a/", "b/custom.json"], "Plugins": [{"Type": "resource", "Name": "top"}]}"#,
        );
        write(&root.join("a/plugInfo.json"), &resource("a"));
        write(&root.join("b/custom.json"), &resource("b"));

        let resolution = ManifestResolver::new().resolve(&[root.join("plugInfo.json")]);
        assert_eq!(names(&resolution), vec!["top", "a", "b"]);
    }

    #[test]
    fn test_absolute_include() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        write(&other.path().join("plugInfo.json"), &resource("elsewhere"));
        let include = other.path().join("plugInfo.json");
        write(
            &dir.path().join("plugInfo.json"),
            &format!(
                r#"{{"Includes": [{}]}}"#,
                serde_json::to_string(&include.to_string_lossy()).unwrap()
            ),
        );

        let resolution = ManifestResolver::new().resolve(&[dir.path()]);
        assert_eq!(names(&resolution), vec!["elsewhere"]);
    }

    #[test]
    fn test_glob_includes() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("plugInfo.json"),
            r#"{"Includes": ["a*b/plugInfo.json"]}"#,
        );
        write(&root.join("axb/plugInfo.json"), &resource("single"));
        write(&root.join("a/x/b/plugInfo.json"), &resource("nested"));

        let resolution = ManifestResolver::new().resolve(&[root]);
        assert_eq!(names(&resolution), vec!["single"]);

        write(
            &root.join("plugInfo.json"),
            r#"{"Includes": ["a**b/plugInfo.json"]}"#,
        );
        let resolution = ManifestResolver::new().resolve(&[root]);
        assert_eq!(names(&resolution), vec!["nested", "single"]);
    }

    #[test]
    fn test_glob_matching_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("plugInfo.json"), r#"{"Includes": ["*/"]}"#);
        write(&root.join("one/plugInfo.json"), &resource("one"));
        write(&root.join("two/plugInfo.json"), &resource("two"));
        std::fs::create_dir_all(root.join("empty")).unwrap();

        let resolution = ManifestResolver::new().resolve(&[root]);
        assert_eq!(names(&resolution), vec!["one", "two"]);
        assert!(resolution.errors.is_empty());
    }

    #[test]
    fn test_include_cycle_is_silent() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("a/plugInfo.json"),
            r#"{"Includes": ["../b/"], "Plugins": [{"Type": "resource", "Name": "a"}]}"#,
        );
        write(
            &root.join("b/plugInfo.json"),
            r#"{"Includes": ["../a/"], "Plugins": [{"Type": "resource", "Name": "b"}]}"#,
        );

        let resolution = ManifestResolver::new().resolve(&[root.join("a")]);
        assert_eq!(names(&resolution), vec!["a", "b"]);
        assert!(resolution.errors.is_empty());
    }

    #[test]
    fn test_same_file_through_two_paths_parsed_once() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("shared/plugInfo.json"), &resource("shared"));
        write(
            &root.join("plugInfo.json"),
            r#"{"Includes": ["shared/", "./shared/plugInfo.json", "*/plugInfo.json"]}"#,
        );

        let resolution = ManifestResolver::new().resolve(&[root.to_path_buf(), root.join("shared")]);
        assert_eq!(names(&resolution), vec!["shared"]);
        assert_eq!(resolution.manifests.len(), 2);
    }

    #[test]
    fn test_known_manifests_are_not_parsed_again() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("shared/plugInfo.json"), &resource("shared"));
        write(
            &root.join("plugInfo.json"),
            r#"{"Includes": ["shared/"], "Plugins": [{"Type": "resource", "Name": "top"}]}"#,
        );

        let resolver = ManifestResolver::new();
        let first = resolver.resolve(&[root.join("shared")]);
        let known: HashSet<PathBuf> = first.manifests.into_iter().collect();

        let second = resolver.resolve_excluding(&[root], &known);
        assert_eq!(names(&second), vec!["top"]);
        assert_eq!(second.manifests.len(), 1);
        assert!(!known.contains(&second.manifests[0]));
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join("plugInfo.json"),
            r#"{"Includes": ["nowhere/"], "Plugins": [{"Type": "resource", "Name": "here"}]}"#,
        );
        let resolution = ManifestResolver::new().resolve(&[dir.path()]);
        assert_eq!(names(&resolution), vec!["here"]);
        assert!(resolution.errors.is_empty());
    }

    #[test]
    fn test_malformed_manifest_does_not_stop_batch() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("bad/plugInfo.json"), "{ broken");
        write(&root.join("good/plugInfo.json"), &resource("good"));

        let resolution = ManifestResolver::new().resolve(&[root.join("bad"), root.join("good")]);
        assert_eq!(names(&resolution), vec!["good"]);
        assert_eq!(resolution.errors.len(), 1);
        assert!(matches!(resolution.errors[0], ManifestError::Parse { .. }));
    }

    #[test]
    fn test_include_depth_limit() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("plugInfo.json"),
            r#"{"Includes": ["n/"], "Plugins": [{"Type": "resource", "Name": "r"}]}"#,
        );
        write(&root.join("n/plugInfo.json"), &resource("n"));

        let resolution = ManifestResolver::new()
            .with_max_include_depth(0)
            .resolve(&[root]);
        assert_eq!(names(&resolution), vec!["r"]);
        assert!(matches!(
            resolution.errors[0],
            ManifestError::IncludeDepthExceeded { max: 0, .. }
        ));
    }

    #[test]
    fn test_custom_manifest_file_name() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("plugin.json"), &resource("custom"));
        let resolution = ManifestResolver::new()
            .with_manifest_file_name("plugin.json")
            .resolve(&[dir.path()]);
        assert_eq!(names(&resolution), vec!["custom"]);
    }
}
