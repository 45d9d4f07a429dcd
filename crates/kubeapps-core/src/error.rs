//! Error types for `kubeapps-core`.
//!
//! [`CoreError`] covers failures detected while assembling the plugin set,
//! before any network I/O occurs. Per-request failures are `tonic::Status`
//! values returned by the plugin traits.

use thiserror::Error;

/// Plugin-set assembly error.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    /// A plugin name is empty or whitespace-only.
    #[error("plugin name cannot be empty")]
    EmptyPluginName,

    /// Two plugins with the same name and version were supplied.
    #[error("plugin '{0}' is registered more than once")]
    DuplicatePlugin(String),

    /// A plugin was handed to a service it does not implement.
    #[error("plugin '{plugin}' does not implement {contract}")]
    MissingImplementation {
        plugin: String,
        contract: crate::contract::ServiceContract,
    },

    /// The external loader failed to produce the plugin set.
    #[error("failed to load plugins: {0}")]
    Load(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
