//! Kind-specific code loading.
//!
//! The load state machine never touches the OS loader directly; it calls the
//! [`LoaderBackend`] registered for the plugin's kind. Tests swap in a fake.

use std::sync::{Arc, Mutex, PoisonError};

use crate::manifest::PluginKind;

use super::{Plugin, PluginError};

/// Default symbol looked up in a freshly opened shared library.
pub const DEFAULT_ENTRY_SYMBOL: &str = "plug_module_init";

pub trait LoaderBackend: Send + Sync {
    /// Brings the plugin's code into the process. Called at most once per
    /// successful load.
    fn load(&self, plugin: &Plugin) -> Result<(), PluginError>;
}

impl<F> LoaderBackend for F
where
    F: Fn(&Plugin) -> Result<(), PluginError> + Send + Sync,
{
    fn load(&self, plugin: &Plugin) -> Result<(), PluginError> {
        self(plugin)
    }
}

/// One backend per plugin kind.
#[derive(Clone)]
pub struct Backends {
    library: Arc<dyn LoaderBackend>,
    script: Arc<dyn LoaderBackend>,
    resource: Arc<dyn LoaderBackend>,
}

impl Default for Backends {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_SYMBOL)
    }
}

impl Backends {
    pub fn new(entry_symbol: impl Into<String>) -> Self {
        Self {
            library: Arc::new(LibraryBackend::new(entry_symbol)),
            script: Arc::new(ScriptBackend::default()),
            resource: Arc::new(ResourceBackend),
        }
    }

    /// Routes every kind to the same backend.
    pub fn uniform(backend: Arc<dyn LoaderBackend>) -> Self {
        Self {
            library: Arc::clone(&backend),
            script: Arc::clone(&backend),
            resource: backend,
        }
    }

    pub fn with_library(mut self, backend: Arc<dyn LoaderBackend>) -> Self {
        self.library = backend;
        self
    }

    pub fn with_script(mut self, backend: Arc<dyn LoaderBackend>) -> Self {
        self.script = backend;
        self
    }

    pub fn with_resource(mut self, backend: Arc<dyn LoaderBackend>) -> Self {
        self.resource = backend;
        self
    }

    pub fn for_kind(&self, kind: PluginKind) -> &Arc<dyn LoaderBackend> {
        match kind {
            PluginKind::Library => &self.library,
            PluginKind::Script => &self.script,
            PluginKind::Resource => &self.resource,
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

type EntryPoint = unsafe extern "C" fn() -> i32;

/// Opens shared libraries and runs their registration entry point.
///
/// The entry point is optional: libraries that register through static
/// constructors need not export it. A non-zero return is a load failure.
/// Opened libraries stay mapped for the life of the backend.
pub struct LibraryBackend {
    entry_symbol: String,
    libraries: Mutex<Vec<libloading::Library>>,
}

impl LibraryBackend {
    pub fn new(entry_symbol: impl Into<String>) -> Self {
        Self {
            entry_symbol: entry_symbol.into(),
            libraries: Mutex::new(Vec::new()),
        }
    }

    pub fn entry_symbol(&self) -> &str {
        &self.entry_symbol
    }

    pub fn loaded_count(&self) -> usize {
        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LoaderBackend for LibraryBackend {
    fn load(&self, plugin: &Plugin) -> Result<(), PluginError> {
        let path = plugin.library_path();
        tracing::debug!(plugin = %plugin.name(), path = %path.display(), "Opening plugin library");

        // SAFETY: running a plugin's initializers is the point of loading it;
        // the manifest author vouches for the library.
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| PluginError::load(plugin.name(), e.to_string()))?;

        {
            // SAFETY: the entry point signature is part of the plugin ABI.
            let entry = unsafe { library.get::<EntryPoint>(self.entry_symbol.as_bytes()) };
            match entry {
                Ok(init) => {
                    // SAFETY: `library` outlives the symbol, and the entry point
                    // takes no arguments and runs once per opened library.
                    let status = unsafe { init() };
                    if status != 0 {
                        return Err(PluginError::load(
                            plugin.name(),
                            format!("entry point '{}' returned {status}", self.entry_symbol),
                        ));
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        plugin = %plugin.name(),
                        symbol = %self.entry_symbol,
                        error = %e,
                        "No registration entry point"
                    );
                }
            }
        }

        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(library);
        Ok(())
    }
}

/// Imports a script module by name.
pub trait ScriptImporter: Send + Sync {
    fn import(&self, module: &str) -> Result<(), String>;
}

/// Importer used when no script runtime is compiled in.
#[derive(Debug, Default)]
pub struct UnavailableImporter;

impl ScriptImporter for UnavailableImporter {
    fn import(&self, module: &str) -> Result<(), String> {
        Err(format!(
            "cannot import '{module}': no script runtime available (enable the `python` feature or install a ScriptImporter)"
        ))
    }
}

#[cfg(feature = "python")]
#[derive(Debug, Default)]
pub struct PythonImporter;

#[cfg(feature = "python")]
impl ScriptImporter for PythonImporter {
    fn import(&self, module: &str) -> Result<(), String> {
        pyo3::Python::attach(|py| {
            py.import(module)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }
}

/// Loads script plugins; the plugin `Name` is the module name.
pub struct ScriptBackend {
    importer: Arc<dyn ScriptImporter>,
}

impl Default for ScriptBackend {
    fn default() -> Self {
        #[cfg(feature = "python")]
        let importer: Arc<dyn ScriptImporter> = Arc::new(PythonImporter);
        #[cfg(not(feature = "python"))]
        let importer: Arc<dyn ScriptImporter> = Arc::new(UnavailableImporter);
        Self { importer }
    }
}

impl ScriptBackend {
    pub fn new(importer: Arc<dyn ScriptImporter>) -> Self {
        Self { importer }
    }
}

impl LoaderBackend for ScriptBackend {
    fn load(&self, plugin: &Plugin) -> Result<(), PluginError> {
        tracing::debug!(plugin = %plugin.name(), "Importing script module");
        self.importer
            .import(plugin.name())
            .map_err(|message| PluginError::load(plugin.name(), message))
    }
}

/// Resource plugins carry no code.
#[derive(Debug, Default)]
pub struct ResourceBackend;

impl LoaderBackend for ResourceBackend {
    fn load(&self, _plugin: &Plugin) -> Result<(), PluginError> {
        Ok(())
    }
}
