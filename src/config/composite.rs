//! Composite Configuration Provider
//!
//! Chains multiple configuration providers with priority ordering.
//! Earlier providers have higher priority.

use std::collections::BTreeSet;

use super::ConfigResult;
use super::provider::ConfigProvider;

/// Composite configuration provider that chains multiple providers
#[derive(Default)]
pub struct CompositeConfigProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider (first added = highest priority)
    pub fn add_provider(&mut self, provider: Box<dyn ConfigProvider>) {
        self.providers.push(provider);
    }

    /// Add a provider and return self (for chaining)
    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

impl ConfigProvider for CompositeConfigProvider {
    fn name(&self) -> &str {
        "composite"
    }

    fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        for provider in &self.providers {
            if let Some(value) = provider.get_raw(key)? {
                tracing::trace!(key, provider = provider.name(), "Resolved configuration value");
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let mut all_keys = BTreeSet::new();
        for provider in &self.providers {
            all_keys.extend(provider.list_keys(prefix)?);
        }
        Ok(all_keys.into_iter().collect())
    }
}

impl std::fmt::Debug for CompositeConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeConfigProvider")
            .field("provider_count", &self.providers.len())
            .field("provider_names", &self.provider_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::memory::MemoryConfigProvider;

    #[test]
    fn test_composite_provider_priority() {
        let high = MemoryConfigProvider::named("high").value("key", "high_value");
        let low = MemoryConfigProvider::named("low")
            .value("key", "low_value")
            .value("only_low", "from_low");

        let composite = CompositeConfigProvider::new()
            .provider(Box::new(high))
            .provider(Box::new(low));

        assert_eq!(composite.get_raw("key").unwrap(), Some("high_value".to_string()));
        assert_eq!(
            composite.get_raw("only_low").unwrap(),
            Some("from_low".to_string())
        );
        assert_eq!(composite.provider_names(), vec!["high", "low"]);
    }

    #[test]
    fn test_composite_provider_list_keys() {
        let p1 = MemoryConfigProvider::new()
            .value("app.name", "a")
            .value("app.version", "b");
        let p2 = MemoryConfigProvider::new()
            .value("app.name", "c")
            .value("other", "d");

        let composite = CompositeConfigProvider::new()
            .provider(Box::new(p1))
            .provider(Box::new(p2));

        assert_eq!(
            composite.list_keys("app.").unwrap(),
            vec!["app.name", "app.version"]
        );
    }
}
