//! Registration, discovery and query behavior of the plugin catalog.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use plugin_catalog::{
    Backends, LoadState, ManifestError, PlugRegistry, Plugin, PluginError, PluginKind,
    PluginsRegistered, RegistrationError, RegistryConfig,
};
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// A registry whose backends only count invocations.
fn counting_registry() -> (PlugRegistry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let backend = move |_: &Plugin| -> Result<(), PluginError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };
    let registry = PlugRegistry::builder()
        .backends(Backends::uniform(Arc::new(backend)))
        .build();
    (registry, calls)
}

const SHAPES: &str = r#"
# Geometry plugin
{
    "Plugins": [
        {
            "Type": "python",
            "Name": "geom",
            "Info": {
                "Types": {
                    "Shape": {},
                    "Sphere": {
                        "bases": ["Shape"],
                        "displayName": "Sphere",
                        "alias": { "Shape": "ball" }
                    },
                    "Cube": {
                        "bases": "Shape",
                        "displayName": "Cube",
                        "aliases": ["box"],
                        "sides": 6
                    }
                }
            }
        }
    ]
}
"#;

#[test]
fn test_registration_is_lazy_and_idempotent() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("plugInfo.json"), SHAPES);
    let (registry, calls) = counting_registry();

    let added = registry.register_plugins(&[dir.path()]);
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].name(), "geom");
    assert_eq!(added[0].kind(), PluginKind::Script);
    assert_eq!(added[0].state(), LoadState::Unloaded);

    assert!(registry.register_plugins(&[dir.path()]).is_empty());
    let trailing = format!("{}/./", dir.path().display());
    assert!(registry.register_plugins(&[trailing]).is_empty());
    assert_eq!(registry.all_plugins().len(), 1);

    assert!(registry.plugin_for_type("Sphere").is_some());
    assert_eq!(registry.all_derived_types("Shape").len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!registry.plugin_with_name("geom").unwrap().is_loaded());
}

#[test]
fn test_included_manifest_registered_earlier_adds_nothing() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(&root.join("shapes/plugInfo.json"), SHAPES);
    write(
        &root.join("plugInfo.json"),
        r#"{ "Includes": [ "shapes/" ],
             "Plugins": [ { "Type": "resource", "Name": "top" } ] }"#,
    );
    let (registry, _) = counting_registry();

    let first = registry.register_plugins(&[root.join("shapes")]);
    assert_eq!(first.len(), 1);

    let report = registry.register_plugins_report(&[root]);
    let names: Vec<&str> = report.plugins.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["top"]);
    assert!(report.errors.is_empty());
    assert_eq!(registry.all_plugins().len(), 2);
    assert_eq!(registry.metrics().plugins_registered, 2);
}

#[test]
fn test_type_queries_and_metadata() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("plugInfo.json"), SHAPES);
    let (registry, _) = counting_registry();
    registry.register_plugins(&[dir.path()]);

    let derived: Vec<String> = registry
        .all_derived_types("Shape")
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    assert_eq!(derived, vec!["Cube", "Sphere"]);

    assert_eq!(
        registry.find_derived_type_by_name("Shape", "ball").unwrap().name(),
        "Sphere"
    );
    assert!(registry.find_type_by_name("ball").is_none());
    assert_eq!(registry.find_type_by_name("box").unwrap().name(), "Cube");
    assert_eq!(registry.plugin_for_type("box").unwrap().name(), "geom");

    assert_eq!(
        registry.string_from_plugin_metadata("Sphere", "displayName"),
        Some("Sphere".to_string())
    );
    assert_eq!(
        registry.data_from_plugin_metadata("Cube", "sides"),
        Some(serde_json::json!(6))
    );
    assert!(registry.string_from_plugin_metadata("Cube", "sides").is_none());

    let geom = registry.plugin_with_name("geom").unwrap();
    assert!(geom.declares_type("Cube", false));
    assert!(geom.declares_type("Shape", true));
    assert!(!geom.declares_type("Renderer", true));
}

#[test]
fn test_includes_and_globs() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        &root.join("plugInfo.json"),
        r#"{ "Includes": [ "*/", "deep/**/plugInfo.json" ] }"#,
    );
    write(
        &root.join("one/plugInfo.json"),
        r#"{ "Plugins": [ { "Type": "resource", "Name": "one" } ] }"#,
    );
    write(
        &root.join("two/plugInfo.json"),
        r#"{ "Plugins": [ { "Type": "resource", "Name": "two" } ] }"#,
    );
    write(
        &root.join("deep/a/b/plugInfo.json"),
        r#"{ "Plugins": [ { "Type": "resource", "Name": "deep" } ] }"#,
    );

    let (registry, _) = counting_registry();
    let mut names: Vec<String> = registry
        .register_plugins(&[root])
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["deep", "one", "two"]);
}

#[test]
fn test_resource_plugins_start_loaded_and_resolve_paths() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("pkg/plugInfo.json"),
        r#"{ "Plugins": [ { "Type": "resource", "Name": "icons", "Root": "..", "ResourcePath": "share" } ] }"#,
    );
    write(&dir.path().join("share/icon.png"), "png");

    let (registry, calls) = counting_registry();
    registry.register_plugins(&[dir.path().join("pkg")]);
    let icons = registry.plugin_with_name("icons").unwrap();
    assert!(icons.is_loaded());
    assert!(icons.load().is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let root = dir.path().canonicalize().unwrap();
    assert_eq!(icons.path(), root);
    assert_eq!(icons.resource_path(), root.join("share"));
    assert_eq!(icons.find_resource("icon.png", true), Some(root.join("share/icon.png")));
    assert!(icons.find_resource("missing.png", true).is_none());
    assert_eq!(
        icons.find_resource("missing.png", false),
        Some(root.join("share/missing.png"))
    );
    assert_eq!(icons.make_resource_path("/abs/x"), Path::new("/abs/x"));
    assert!(icons.make_resource_path("").as_os_str().is_empty());
}

#[test]
fn test_bad_manifests_are_reported_and_skipped() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("bad/plugInfo.json"), "{ not json");
    write(
        &dir.path().join("good/plugInfo.json"),
        r#"{ "Plugins": [
            { "Type": "library", "Name": "nolib" },
            { "Type": "resource", "Name": "good" }
        ] }"#,
    );

    let (registry, _) = counting_registry();
    let report = registry.register_plugins_report(&[
        dir.path().join("bad"),
        dir.path().join("missing"),
        dir.path().join("good"),
    ]);

    let names: Vec<&str> = report.plugins.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["good"]);
    assert!(report.errors.iter().any(|e| matches!(
        e,
        RegistrationError::Manifest(ManifestError::Parse { .. })
    )));
    assert!(report.errors.iter().any(|e| matches!(
        e,
        RegistrationError::Manifest(ManifestError::MissingField { .. })
    )));
    assert_eq!(registry.metrics().plugins_registered, 1);
}

#[test]
fn test_events_only_for_non_empty_batches() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("plugInfo.json"), SHAPES);
    let empty = TempDir::new().unwrap();

    let (registry, _) = counting_registry();
    let mut events = registry.subscribe();
    let heard = Arc::new(AtomicUsize::new(0));
    let listener_count = Arc::clone(&heard);
    let seen_by_listener = registry.clone();
    registry.add_listener(Arc::new(move |notice: &PluginsRegistered| {
        assert!(seen_by_listener.plugin_with_name("geom").is_some());
        listener_count.fetch_add(notice.plugins.len(), Ordering::SeqCst);
    }));

    registry.register_plugins(&[dir.path()]);
    let notice = events.try_recv().unwrap();
    assert_eq!(notice.names(), vec!["geom"]);
    assert_eq!(heard.load(Ordering::SeqCst), 1);

    registry.register_plugins(&[dir.path()]);
    registry.register_plugins(&[empty.path()]);
    assert!(events.try_recv().is_err());
    assert_eq!(heard.load(Ordering::SeqCst), 1);
}

#[test]
fn test_search_paths_from_config() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("plugin.json"),
        r#"{ "Plugins": [ { "Type": "resource", "Name": "custom" } ] }"#,
    );

    let registry = PlugRegistry::builder()
        .config(
            RegistryConfig::new()
                .manifest_file_name("plugin.json")
                .search_path(dir.path()),
        )
        .build();
    assert!(registry.plugin_with_name("custom").is_some());
    assert_eq!(registry.config().manifest_file_name, "plugin.json");
}

#[tokio::test]
async fn test_register_plugins_async() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("plugInfo.json"), SHAPES);
    let (registry, _) = counting_registry();

    let added = registry
        .register_plugins_async(vec![dir.path().to_path_buf()])
        .await
        .unwrap();
    assert_eq!(added.len(), 1);
    assert!(registry.plugin_for_type("Cube").is_some());
}
