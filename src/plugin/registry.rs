//! Plugin registry
//!
//! Built once at startup from an explicit list; lookups only afterwards.

use super::builtin::{DeliveryPlugin, TracePlugin};
use super::traits::FragmentPlugin;
use crate::config::ConfigError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type PluginFactory = Box<dyn Fn() -> Arc<dyn FragmentPlugin> + Send + Sync>;

/// Named plugin constructors that configuration can refer to
pub struct PluginCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The built-in plugins (`trace`, `delivery`)
    pub fn builtin() -> Self {
        Self::empty()
            .with("trace", || Arc::new(TracePlugin::new()) as Arc<dyn FragmentPlugin>)
            .with("delivery", || Arc::new(DeliveryPlugin::new()) as Arc<dyn FragmentPlugin>)
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn FragmentPlugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn build(&self, name: &str) -> Option<Arc<dyn FragmentPlugin>> {
        self.factories.get(name).map(|f| f())
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The plugins active in this process, deduplicated by `id()`
#[derive(Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn FragmentPlugin>>,
}

impl PluginRegistry {
    /// Create a registry with the given plugins, deduplicated by id.
    pub fn new(plugins: Vec<Arc<dyn FragmentPlugin>>) -> Self {
        let mut seen = HashSet::new();
        let deduped = plugins
            .into_iter()
            .filter(|p| seen.insert(p.id().to_string()))
            .collect();
        Self { plugins: deduped }
    }

    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Instantiate the named plugins from a catalog, in order
    pub fn from_names<S: AsRef<str>>(names: &[S], catalog: &PluginCatalog) -> Result<Self, ConfigError> {
        let plugins = names
            .iter()
            .map(|name| {
                catalog
                    .build(name.as_ref())
                    .ok_or_else(|| ConfigError::UnknownPlugin(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(plugins))
    }

    pub fn plugins(&self) -> &[Arc<dyn FragmentPlugin>] {
        &self.plugins
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn FragmentPlugin>> {
        self.plugins.iter().find(|p| p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
