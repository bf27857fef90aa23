//! Plugin entity and its load state machine.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::{Map, Value};

use crate::manifest::{PluginDescriptor, PluginKind};
use crate::observability::LoadSpan;
use crate::type_system::DeclaredType;

use super::PluginError;
use super::dependency::{DependencyEdge, resolve_load_order};
use super::registry::{CatalogGraph, RegistryInner};

/// Registration-order identity of a plugin within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);

impl PluginId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    Unloaded = 0,
    Loading = 1,
    Loaded = 2,
}

impl LoadState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => LoadState::Loaded,
            1 => LoadState::Loading,
            _ => LoadState::Unloaded,
        }
    }
}

thread_local! {
    static LOAD_PATH: RefCell<Vec<PluginId>> = const { RefCell::new(Vec::new()) };
}

/// Marks a plugin as being loaded by the current thread until dropped.
struct LoadPathGuard(PluginId);

impl LoadPathGuard {
    fn enter(id: PluginId) -> Self {
        LOAD_PATH.with_borrow_mut(|path| path.push(id));
        Self(id)
    }
}

impl Drop for LoadPathGuard {
    fn drop(&mut self) {
        LOAD_PATH.with_borrow_mut(|path| {
            if let Some(pos) = path.iter().rposition(|id| *id == self.0) {
                path.remove(pos);
            }
        });
    }
}

pub(crate) fn loading_on_this_thread(id: PluginId) -> bool {
    LOAD_PATH.with_borrow(|path| path.contains(&id))
}

/// One discovered plugin.
///
/// Identity and metadata are fixed at registration. Only the load state
/// changes, and only forward, except that a failed load returns to
/// [`LoadState::Unloaded`] so the caller may retry.
pub struct Plugin {
    id: PluginId,
    name: String,
    kind: PluginKind,
    root: PathBuf,
    manifest_path: PathBuf,
    library_path: PathBuf,
    resource_path: PathBuf,
    metadata: Map<String, Value>,
    declared: Vec<DeclaredType>,
    dependencies: Vec<DependencyEdge>,
    state: AtomicU8,
    /// Completed load attempts; lets waiters tell whether the attempt they
    /// queued behind has finished.
    attempts: AtomicU64,
    /// Serializes loads and holds the outcome of the last failed attempt.
    load_lock: Mutex<Option<PluginError>>,
    registry: Weak<RegistryInner>,
}

impl Plugin {
    pub(crate) fn new(id: PluginId, descriptor: PluginDescriptor, registry: Weak<RegistryInner>) -> Self {
        let declared = DeclaredType::parse_all(&descriptor.info);
        let dependencies = DependencyEdge::parse_all(&descriptor.name, &descriptor.info);
        let initial = match descriptor.kind {
            PluginKind::Resource => LoadState::Loaded,
            PluginKind::Library | PluginKind::Script => LoadState::Unloaded,
        };

        Self {
            id,
            name: descriptor.name,
            kind: descriptor.kind,
            root: descriptor.root,
            manifest_path: descriptor.manifest_path,
            library_path: descriptor.library_path,
            resource_path: descriptor.resource_path,
            metadata: descriptor.info,
            declared,
            dependencies,
            state: AtomicU8::new(initial as u8),
            attempts: AtomicU64::new(0),
            load_lock: Mutex::new(None),
            registry,
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// The plugin's root directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Shared library to open; empty unless this is a library plugin.
    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn resource_path(&self) -> &Path {
        &self.resource_path
    }

    /// The manifest's `Info` document.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// The `Info.Types.<type_name>` entry, if this plugin declares the type.
    pub fn metadata_for_type(&self, type_name: &str) -> Option<&Map<String, Value>> {
        self.declared
            .iter()
            .find(|t| t.name == type_name)
            .map(|t| &t.metadata)
    }

    pub fn dependencies(&self) -> &[DependencyEdge] {
        &self.dependencies
    }

    pub fn declared_types(&self) -> &[DeclaredType] {
        &self.declared
    }

    /// True if the plugin declares `type_name`, or with `include_subclasses`
    /// any type deriving from it.
    pub fn declares_type(&self, type_name: &str, include_subclasses: bool) -> bool {
        if self.declared.iter().any(|t| t.name == type_name) {
            return true;
        }
        if !include_subclasses {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let types = registry.type_system();
        let Some(base) = types.find_type_by_name(type_name) else {
            return false;
        };
        self.declared.iter().any(|t| {
            types
                .find_type_by_name(&t.name)
                .is_some_and(|ty| types.is_a(&ty, &base))
        })
    }

    pub fn state(&self) -> LoadState {
        LoadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    pub fn is_resource(&self) -> bool {
        self.kind == PluginKind::Resource
    }

    pub fn is_script(&self) -> bool {
        self.kind == PluginKind::Script
    }

    pub fn is_library(&self) -> bool {
        self.kind == PluginKind::Library
    }

    /// Absolute paths are returned unchanged, relative ones are joined onto
    /// the resource path. An empty path stays empty.
    pub fn make_resource_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return PathBuf::new();
        }
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.resource_path.join(path)
    }

    /// Like [`Plugin::make_resource_path`]; with `verify`, returns `None`
    /// unless the result exists.
    pub fn find_resource(&self, path: impl AsRef<Path>, verify: bool) -> Option<PathBuf> {
        let resolved = self.make_resource_path(path);
        if resolved.as_os_str().is_empty() || (verify && !resolved.exists()) {
            return None;
        }
        Some(resolved)
    }

    /// Loads the plugin's prerequisites and then its code.
    ///
    /// Idempotent once successful. Concurrent callers share a single backend
    /// invocation and all see its outcome. A plugin already being loaded
    /// further up this thread's call chain reports success immediately.
    /// Loads across the registry run one thread at a time, so cycles split
    /// between threads cannot deadlock either.
    pub fn load(self: &Arc<Self>) -> Result<(), PluginError> {
        if self.is_loaded() {
            return Ok(());
        }
        if loading_on_this_thread(self.id) {
            tracing::debug!(plugin = %self.name, "Plugin already loading on this thread");
            return Ok(());
        }

        let observed = self.attempts.load(Ordering::Acquire);
        let registry = self.registry.upgrade().ok_or(PluginError::RegistryDropped)?;
        // Registry-wide and reentrant: a thread holding it may load any
        // dependency, so two threads never wait on each other's plugins.
        let _serial = registry.load_guard();
        let mut last_failure = self
            .load_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.is_loaded() {
            return Ok(());
        }
        if self.attempts.load(Ordering::Acquire) != observed
            && let Some(failure) = &*last_failure
        {
            return Err(failure.clone());
        }

        let _on_path = LoadPathGuard::enter(self.id);
        self.set_state(LoadState::Loading);

        let result = self.load_locked(&registry);

        match &result {
            Ok(()) => {
                self.set_state(LoadState::Loaded);
                *last_failure = None;
            }
            Err(e) => {
                self.set_state(LoadState::Unloaded);
                *last_failure = Some(e.clone());
            }
        }
        self.attempts.fetch_add(1, Ordering::AcqRel);
        result
    }

    fn load_locked(self: &Arc<Self>, registry: &RegistryInner) -> Result<(), PluginError> {
        let span = LoadSpan::new(&self.name, self.kind.as_str());
        let entered = span.span().clone().entered();
        let metrics = registry.metrics();
        metrics.record_load_start();

        let order = resolve_load_order(&CatalogGraph::new(registry), self);
        metrics.record_diagnostics(order.diagnostics.len());

        let mut result = Ok(());
        for dependency in &order.plugins {
            tracing::debug!(plugin = %self.name, dependency = %dependency.name(), "Loading dependency");
            if let Err(e) = dependency.load() {
                result = Err(PluginError::DependencyFailed {
                    plugin: self.name.clone(),
                    dependency: dependency.name().to_string(),
                    message: e.to_string(),
                });
                break;
            }
        }

        if result.is_ok() {
            metrics.record_backend_call();
            result = registry.backends().for_kind(self.kind).load(self);
        }

        metrics.record_load_end(result.is_ok());
        match &result {
            Ok(()) => tracing::info!(plugin = %self.name, kind = %self.kind, "Loaded plugin"),
            Err(e) => tracing::error!(plugin = %self.name, error = %e, "Failed to load plugin"),
        }
        drop(entered);
        span.finish(result.is_ok());
        result
    }

    /// Runs [`Plugin::load`] on the blocking thread pool.
    pub async fn load_async(self: &Arc<Self>) -> Result<(), PluginError> {
        if self.is_loaded() {
            return Ok(());
        }
        let plugin = Arc::clone(self);
        tokio::task::spawn_blocking(move || plugin.load()).await?
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("path", &self.root)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detached(kind: PluginKind, info: Value) -> Plugin {
        let descriptor = PluginDescriptor {
            kind,
            name: "geom".into(),
            manifest_path: PathBuf::from("/plugins/geom/plugInfo.json"),
            root: PathBuf::from("/plugins/geom"),
            library_path: PathBuf::from("/plugins/geom/libgeom.so"),
            resource_path: PathBuf::from("/plugins/geom/resources"),
            info: info.as_object().cloned().unwrap_or_default(),
        };
        Plugin::new(PluginId::new(1), descriptor, Weak::new())
    }

    #[test]
    fn test_initial_state_by_kind() {
        assert!(detached(PluginKind::Resource, json!({})).is_loaded());
        let lib = detached(PluginKind::Library, json!({}));
        assert!(!lib.is_loaded());
        assert_eq!(lib.state(), LoadState::Unloaded);
        assert!(lib.is_library());
        assert!(!lib.is_script());
    }

    #[test]
    fn test_make_resource_path() {
        let plugin = detached(PluginKind::Resource, json!({}));
        assert_eq!(plugin.make_resource_path("/abs/x"), PathBuf::from("/abs/x"));
        assert_eq!(
            plugin.make_resource_path("rel/x"),
            PathBuf::from("/plugins/geom/resources/rel/x")
        );
        assert_eq!(plugin.make_resource_path(""), PathBuf::new());
    }

    #[test]
    fn test_find_resource_verify() {
        let plugin = detached(PluginKind::Resource, json!({}));
        assert_eq!(plugin.find_resource("missing.txt", true), None);
        assert_eq!(
            plugin.find_resource("missing.txt", false),
            Some(PathBuf::from("/plugins/geom/resources/missing.txt"))
        );
    }

    #[test]
    fn test_metadata_accessors() {
        let plugin = detached(
            PluginKind::Library,
            json!({
                "Types": {"Sphere": {"bases": ["Shape"], "displayName": "Sphere!"}},
                "PluginDependencies": {"Shape": ["Cube"]}
            }),
        );
        assert_eq!(
            plugin.metadata_for_type("Sphere").and_then(|m| m.get("displayName")),
            Some(&json!("Sphere!"))
        );
        assert!(plugin.metadata_for_type("Cube").is_none());
        assert_eq!(plugin.dependencies().len(), 1);
        assert!(plugin.declares_type("Sphere", false));
        assert!(!plugin.declares_type("Shape", false));
        // No registry, so no type hierarchy to consult.
        assert!(!plugin.declares_type("Shape", true));
    }

    #[test]
    fn test_load_without_registry_fails() {
        let plugin = Arc::new(detached(PluginKind::Library, json!({})));
        assert!(matches!(plugin.load(), Err(PluginError::RegistryDropped)));
        assert_eq!(plugin.state(), LoadState::Unloaded);
    }

    #[test]
    fn test_load_path_guard() {
        let id = PluginId::new(42);
        assert!(!loading_on_this_thread(id));
        {
            let _guard = LoadPathGuard::enter(id);
            assert!(loading_on_this_thread(id));
        }
        assert!(!loading_on_this_thread(id));
    }
}
