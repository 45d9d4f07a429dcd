//! `kubeapps-core`: contracts shared by the Kubeapps APIs ingress and its
//! plugins.
//!
//! The ingress (`kubeapps-apis`) never inspects a plugin's concrete type.
//! Instead every loaded plugin is described by a [`PluginHandle`] carrying an
//! explicit, load-time capability set of [`ServiceContract`]s. The
//! [`capability`] module answers "which plugins serve contract X?" and the
//! server wires the answer into both RPC server generations.
//!
//! | Concern | Items |
//! |---------|-------|
//! | Service contracts | [`ServiceContract`] |
//! | Plugin handles | [`PluginHandle`], [`PluginDescriptor`], [`PackagesPlugin`], [`RepositoriesPlugin`] |
//! | Capability routing | [`capability::plugins_satisfying`] |
//! | Loader boundary | [`loader::PluginLoader`], [`loader::StaticPluginLoader`] |
//! | Wire messages | [`proto`] |
//!
//! # Quick start
//!
//! ```rust,no_run
//! use kubeapps_core::{PluginHandle, ServiceContract, capability::plugins_satisfying};
//!
//! let plugins = vec![
//!     PluginHandle::builder("helm.packages", "v1alpha1").build(),
//! ];
//! let packaging = plugins_satisfying(ServiceContract::Packages, &plugins);
//! assert!(packaging.is_empty());
//! ```

pub mod capability;
pub mod contract;
pub mod error;
pub mod loader;
pub mod plugin;
pub mod proto;

pub use contract::ServiceContract;
pub use error::{CoreError, CoreResult};
pub use plugin::{
    CapabilitySet, PackagesPlugin, PluginDescriptor, PluginHandle, PluginHandleBuilder,
    RepositoriesPlugin, validate_plugin_set,
};
