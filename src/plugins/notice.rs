use std::sync::Arc;

use super::Plugin;

/// Sent once per registration batch that added at least one plugin.
#[derive(Debug, Clone)]
pub struct PluginsRegistered {
    pub plugins: Vec<Arc<Plugin>>,
}

impl PluginsRegistered {
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}

/// Synchronous observer called after a batch is committed, outside the
/// registry lock. Listeners may query the registry.
pub trait RegistrationListener: Send + Sync {
    fn on_plugins_registered(&self, notice: &PluginsRegistered);
}

impl<F> RegistrationListener for F
where
    F: Fn(&PluginsRegistered) + Send + Sync,
{
    fn on_plugins_registered(&self, notice: &PluginsRegistered) {
        self(notice)
    }
}
