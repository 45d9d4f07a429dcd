//! Plugin loader boundary.
//!
//! Discovering and loading plugins is the job of an external collaborator.
//! The server only needs a [`PluginLoader`] that turns a [`PluginConfig`]
//! into a fixed list of [`PluginHandle`]s before bootstrap begins.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::CoreResult;
use crate::plugin::{PluginHandle, validate_plugin_set};

/// Where plugins come from. Opaque to the ingress; interpreted by the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Directories searched for plugin artifacts.
    pub plugin_dirs: Vec<PathBuf>,
    /// Optional plugin-specific configuration file.
    pub plugin_config_path: Option<PathBuf>,
}

/// Produces the plugin set the server is bootstrapped with.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load(&self, config: &PluginConfig) -> CoreResult<Vec<PluginHandle>>;

    /// Whether [`PluginConfig::plugin_dirs`] is consulted at all.
    fn searches_plugin_dirs(&self) -> bool {
        true
    }
}

/// Loader returning a pre-built list of handles.
#[derive(Debug, Clone, Default)]
pub struct StaticPluginLoader {
    plugins: Vec<PluginHandle>,
}

impl StaticPluginLoader {
    pub fn new(plugins: Vec<PluginHandle>) -> Self {
        Self { plugins }
    }

    pub fn with_plugin(mut self, plugin: PluginHandle) -> Self {
        self.plugins.push(plugin);
        self
    }
}

#[async_trait]
impl PluginLoader for StaticPluginLoader {
    async fn load(&self, config: &PluginConfig) -> CoreResult<Vec<PluginHandle>> {
        validate_plugin_set(&self.plugins)?;
        tracing::debug!(
            plugins = self.plugins.len(),
            dirs = ?config.plugin_dirs,
            "static plugin set loaded"
        );
        Ok(self.plugins.clone())
    }

    fn searches_plugin_dirs(&self) -> bool {
        false
    }
}
