//! The plugin catalog.

use std::any::Any;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::RegistryConfig;
use crate::manifest::{ManifestResolver, join_lexically};
use crate::observability::{MetricsSummary, RegistryMetrics, register_span};
use crate::type_system::{InMemoryTypeRegistry, TypeHandle, TypeSystem};

use super::dependency::{DependencyDiagnostic, DependencyGraph};
use super::error::RegistrationError;
use super::loader::Backends;
use super::notice::{PluginsRegistered, RegistrationListener};
use super::plugin::loading_on_this_thread;
use super::{Plugin, PluginError, PluginId};

const EVENT_CAPACITY: usize = 64;

static GLOBAL: OnceLock<PlugRegistry> = OnceLock::new();

/// Outcome of one registration batch.
#[derive(Debug, Default)]
pub struct RegistrationReport {
    /// Plugins this batch added, in discovery order.
    pub plugins: Vec<Arc<Plugin>>,
    /// Manifests and entries that were skipped.
    pub errors: Vec<RegistrationError>,
}

#[derive(Debug, Default)]
struct CatalogState {
    registered_paths: HashSet<PathBuf>,
    /// Canonical manifest files already parsed, including ones reached
    /// through includes.
    registered_manifests: HashSet<PathBuf>,
    next_id: u64,
}

pub(crate) struct RegistryInner {
    config: RegistryConfig,
    resolver: ManifestResolver,
    catalog: Mutex<CatalogState>,
    plugins_by_name: DashMap<String, Arc<Plugin>>,
    type_to_plugin: DashMap<TypeHandle, Arc<Plugin>>,
    type_system: Arc<dyn TypeSystem>,
    backends: Backends,
    events: broadcast::Sender<PluginsRegistered>,
    listeners: RwLock<Vec<Arc<dyn RegistrationListener>>>,
    metrics: RegistryMetrics,
    /// Held for the dependency and backend phase of every load.
    load_serial: ReentrantMutex<()>,
}

impl RegistryInner {
    pub(crate) fn load_guard(&self) -> ReentrantMutexGuard<'_, ()> {
        self.load_serial.lock()
    }

    pub(crate) fn type_system(&self) -> &dyn TypeSystem {
        self.type_system.as_ref()
    }

    pub(crate) fn backends(&self) -> &Backends {
        &self.backends
    }

    pub(crate) fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    fn plugin_for_handle(&self, ty: &TypeHandle) -> Option<Arc<Plugin>> {
        self.type_to_plugin.get(ty).map(|p| p.value().clone())
    }

    fn declare_types(&self, plugin: &Arc<Plugin>) {
        for declared in plugin.declared_types() {
            let handle =
                self.type_system
                    .declare_type(&declared.name, &declared.bases, &declared.aliases);
            match self.type_to_plugin.entry(handle) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(plugin));
                }
                Entry::Occupied(slot) if slot.get().id() != plugin.id() => {
                    tracing::warn!(
                        type_name = %slot.key(),
                        provider = %slot.get().name(),
                        ignored = %plugin.name(),
                        "Type already provided by another plugin"
                    );
                }
                Entry::Occupied(_) => {}
            }
        }
    }
}

/// Walks `PluginDependencies` edges through the type system and the
/// type-to-plugin map.
pub(crate) struct CatalogGraph<'a> {
    inner: &'a RegistryInner,
}

impl<'a> CatalogGraph<'a> {
    pub(crate) fn new(inner: &'a RegistryInner) -> Self {
        Self { inner }
    }
}

impl DependencyGraph for CatalogGraph<'_> {
    type Node = Arc<Plugin>;

    fn id(&self, node: &Arc<Plugin>) -> PluginId {
        node.id()
    }

    fn label(&self, node: &Arc<Plugin>) -> String {
        node.name().to_string()
    }

    fn prerequisites(
        &self,
        node: &Arc<Plugin>,
        diagnostics: &mut Vec<DependencyDiagnostic>,
    ) -> Vec<Arc<Plugin>> {
        let types = self.inner.type_system();
        let mut out: Vec<Arc<Plugin>> = Vec::new();
        for edge in node.dependencies() {
            let Some(base) = types.find_type_by_name(&edge.base_type) else {
                diagnostics.push(DependencyDiagnostic::UnknownBaseType {
                    plugin: edge.plugin.clone(),
                    base_type: edge.base_type.clone(),
                });
                continue;
            };
            let Some(subtype) = types.find_derived_type_by_name(&base, &edge.subtype) else {
                diagnostics.push(DependencyDiagnostic::UnknownSubtype {
                    plugin: edge.plugin.clone(),
                    base_type: edge.base_type.clone(),
                    subtype: edge.subtype.clone(),
                });
                continue;
            };
            let Some(provider) = self.inner.plugin_for_handle(&subtype) else {
                diagnostics.push(DependencyDiagnostic::NoProvidingPlugin {
                    plugin: edge.plugin.clone(),
                    subtype: edge.subtype.clone(),
                });
                continue;
            };
            if provider.id() != node.id() && !out.iter().any(|p| p.id() == provider.id()) {
                out.push(provider);
            }
        }
        out
    }

    fn in_progress(&self, node: &Arc<Plugin>) -> bool {
        loading_on_this_thread(node.id())
    }
}

/// Builder for [`PlugRegistry`].
pub struct PlugRegistryBuilder {
    config: RegistryConfig,
    type_system: Option<Arc<dyn TypeSystem>>,
    backends: Option<Backends>,
    listeners: Vec<Arc<dyn RegistrationListener>>,
}

impl PlugRegistryBuilder {
    fn new() -> Self {
        Self {
            config: RegistryConfig::default(),
            type_system: None,
            backends: None,
            listeners: Vec::new(),
        }
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn type_system(mut self, type_system: Arc<dyn TypeSystem>) -> Self {
        self.type_system = Some(type_system);
        self
    }

    pub fn backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn RegistrationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Builds the registry and registers the configured search paths.
    pub fn build(self) -> PlugRegistry {
        let resolver = ManifestResolver::new()
            .with_manifest_file_name(self.config.manifest_file_name.clone())
            .with_max_include_depth(self.config.max_include_depth);
        let backends = self
            .backends
            .unwrap_or_else(|| Backends::new(self.config.library_entry_symbol.clone()));
        let type_system = self
            .type_system
            .unwrap_or_else(|| Arc::new(InMemoryTypeRegistry::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let search_paths = self.config.search_paths.clone();

        let registry = PlugRegistry {
            inner: Arc::new(RegistryInner {
                config: self.config,
                resolver,
                catalog: Mutex::new(CatalogState::default()),
                plugins_by_name: DashMap::new(),
                type_to_plugin: DashMap::new(),
                type_system,
                backends,
                events,
                listeners: RwLock::new(self.listeners),
                metrics: RegistryMetrics::new(),
                load_serial: ReentrantMutex::new(()),
            }),
        };

        if !search_paths.is_empty() {
            registry.register_plugins(&search_paths);
        }
        registry
    }
}

/// Catalog of discovered plugins and the types they provide.
///
/// Cheap to clone; clones share one catalog. Registration is idempotent per
/// path, queries never load code, and loading happens through
/// [`Plugin::load`] or [`PlugRegistry::demand_plugin_for_type`].
#[derive(Clone)]
pub struct PlugRegistry {
    inner: Arc<RegistryInner>,
}

impl PlugRegistry {
    pub fn builder() -> PlugRegistryBuilder {
        PlugRegistryBuilder::new()
    }

    /// A registry with default configuration and backends.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// The process-wide registry, built from `PLUG_*` settings on first use.
    pub fn global() -> &'static PlugRegistry {
        GLOBAL.get_or_init(|| {
            let config = RegistryConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid plugin configuration, using defaults");
                RegistryConfig::default()
            });
            Self::builder().config(config).build()
        })
    }

    /// Installs the process-wide registry. Fails if it already exists.
    pub fn init_global(builder: PlugRegistryBuilder) -> Result<&'static PlugRegistry, PluginError> {
        let mut installed = false;
        let registry = GLOBAL.get_or_init(|| {
            installed = true;
            builder.build()
        });
        if installed {
            Ok(registry)
        } else {
            Err(PluginError::GlobalAlreadyInitialized)
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn type_system(&self) -> &Arc<dyn TypeSystem> {
        &self.inner.type_system
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.inner.metrics.snapshot()
    }

    /// Registers the manifests reachable from `paths` and returns the plugins
    /// that were new. Problems are logged; see
    /// [`PlugRegistry::register_plugins_report`] to inspect them.
    pub fn register_plugins<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<Arc<Plugin>> {
        let report = self.register_plugins_report(paths);
        for error in &report.errors {
            tracing::error!(error = %error, "Plugin registration error");
        }
        report.plugins
    }

    pub fn register_plugins_report<P: AsRef<Path>>(&self, paths: &[P]) -> RegistrationReport {
        let span = register_span(paths.len());
        let _enter = span.enter();

        let (fresh, known) = {
            let mut catalog = self.lock_catalog();
            let fresh: Vec<PathBuf> = paths
                .iter()
                .map(|p| absolute(p.as_ref()))
                .filter(|p| catalog.registered_paths.insert(p.clone()))
                .collect();
            (fresh, catalog.registered_manifests.clone())
        };
        if fresh.is_empty() {
            tracing::debug!("All paths already registered");
            return RegistrationReport::default();
        }

        let resolution = self.inner.resolver.resolve_excluding(&fresh, &known);
        let mut report = RegistrationReport {
            plugins: Vec::new(),
            errors: resolution.errors.into_iter().map(Into::into).collect(),
        };

        {
            let mut catalog = self.lock_catalog();
            catalog.registered_manifests.extend(resolution.manifests);
            for descriptor in resolution.plugins {
                let existing = self
                    .inner
                    .plugins_by_name
                    .get(&descriptor.name)
                    .map(|p| p.value().clone());
                if let Some(existing) = existing {
                    if existing.kind() != descriptor.kind || existing.path() != descriptor.root {
                        report.errors.push(
                            PluginError::ConflictingRegistration {
                                name: descriptor.name,
                                existing_kind: existing.kind(),
                                existing_path: existing.path().to_path_buf(),
                                kind: descriptor.kind,
                                path: descriptor.root,
                            }
                            .into(),
                        );
                    }
                    continue;
                }

                let id = PluginId::new(catalog.next_id);
                catalog.next_id += 1;
                let name = descriptor.name.clone();
                let plugin = Arc::new(Plugin::new(id, descriptor, Arc::downgrade(&self.inner)));
                self.inner.declare_types(&plugin);
                self.inner.plugins_by_name.insert(name, Arc::clone(&plugin));
                tracing::debug!(
                    plugin = %plugin.name(),
                    kind = %plugin.kind(),
                    path = %plugin.path().display(),
                    "Registered plugin"
                );
                report.plugins.push(plugin);
            }
        }

        span.record("added", report.plugins.len());
        span.record("errors", report.errors.len());
        self.inner
            .metrics
            .record_registration(report.plugins.len(), report.errors.len());

        if !report.plugins.is_empty() {
            self.notify(PluginsRegistered {
                plugins: report.plugins.clone(),
            });
        }
        report
    }

    /// Runs [`PlugRegistry::register_plugins`] on the blocking thread pool.
    pub async fn register_plugins_async(
        &self,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<Arc<Plugin>>, PluginError> {
        let registry = self.clone();
        let plugins = tokio::task::spawn_blocking(move || registry.register_plugins(&paths)).await?;
        Ok(plugins)
    }

    fn notify(&self, notice: PluginsRegistered) {
        tracing::info!(plugins = ?notice.names(), "Plugins registered");
        let listeners: Vec<Arc<dyn RegistrationListener>> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_plugins_registered(&notice);
        }
        if self.inner.events.send(notice).is_err() {
            tracing::trace!("No subscribers for registration events");
        }
    }

    fn lock_catalog(&self) -> std::sync::MutexGuard<'_, CatalogState> {
        self.inner
            .catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginsRegistered> {
        self.inner.events.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistrationListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// The plugin that declares `type_name` (or a global alias of it).
    pub fn plugin_for_type(&self, type_name: &str) -> Option<Arc<Plugin>> {
        let ty = self.inner.type_system.find_type_by_name(type_name)?;
        self.inner.plugin_for_handle(&ty)
    }

    pub fn plugin_for_handle(&self, ty: &TypeHandle) -> Option<Arc<Plugin>> {
        self.inner.plugin_for_handle(ty)
    }

    pub fn plugin_with_name(&self, name: &str) -> Option<Arc<Plugin>> {
        self.inner
            .plugins_by_name
            .get(name)
            .map(|p| p.value().clone())
    }

    /// Every registered plugin in registration order.
    pub fn all_plugins(&self) -> Vec<Arc<Plugin>> {
        let mut plugins: Vec<Arc<Plugin>> = self
            .inner
            .plugins_by_name
            .iter()
            .map(|p| p.value().clone())
            .collect();
        plugins.sort_by_key(|p| p.id());
        plugins
    }

    pub fn find_type_by_name(&self, name: &str) -> Option<TypeHandle> {
        self.inner.type_system.find_type_by_name(name)
    }

    /// Resolves `name` as a type derived from `base`, following aliases
    /// declared under `base`.
    pub fn find_derived_type_by_name(&self, base: &str, name: &str) -> Option<TypeHandle> {
        let base = self.inner.type_system.find_type_by_name(base)?;
        self.inner.type_system.find_derived_type_by_name(&base, name)
    }

    pub fn all_derived_types(&self, base: &str) -> Vec<TypeHandle> {
        match self.inner.type_system.find_type_by_name(base) {
            Some(base) => self.inner.type_system.all_derived_types(&base),
            None => Vec::new(),
        }
    }

    /// `key` of the providing plugin's `Info.Types.<type_name>` entry.
    pub fn data_from_plugin_metadata(&self, type_name: &str, key: &str) -> Option<Value> {
        let ty = self.inner.type_system.find_type_by_name(type_name)?;
        let plugin = self.inner.plugin_for_handle(&ty)?;
        plugin.metadata_for_type(ty.name())?.get(key).cloned()
    }

    /// Like [`PlugRegistry::data_from_plugin_metadata`], for string values.
    pub fn string_from_plugin_metadata(&self, type_name: &str, key: &str) -> Option<String> {
        match self.data_from_plugin_metadata(type_name, key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Loads the plugin providing `type_name` and returns it.
    pub fn demand_plugin_for_type(&self, type_name: &str) -> Result<Arc<Plugin>, PluginError> {
        let plugin = self
            .plugin_for_type(type_name)
            .ok_or_else(|| PluginError::UnknownType {
                type_name: type_name.to_string(),
            })?;
        plugin.load()?;
        Ok(plugin)
    }

    /// Loads the providing plugin and creates an instance through the
    /// factory its code attached to the type.
    pub fn instantiate(&self, type_name: &str) -> Result<Box<dyn Any + Send>, PluginError> {
        let plugin = self.demand_plugin_for_type(type_name)?;
        let ty = self
            .inner
            .type_system
            .find_type_by_name(type_name)
            .ok_or_else(|| PluginError::UnknownType {
                type_name: type_name.to_string(),
            })?;
        let factory = self
            .inner
            .type_system
            .factory(&ty)
            .ok_or_else(|| PluginError::NoFactory {
                type_name: ty.name().to_string(),
                plugin: plugin.name().to_string(),
            })?;
        Ok(factory.create())
    }
}

impl Default for PlugRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PlugRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlugRegistry")
            .field("plugins", &self.inner.plugins_by_name.len())
            .field("types", &self.inner.type_to_plugin.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return join_lexically(Path::new(""), path);
    }
    match std::env::current_dir() {
        Ok(cwd) => join_lexically(&cwd, path),
        Err(_) => path.to_path_buf(),
    }
}
