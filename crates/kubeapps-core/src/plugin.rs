//! Plugin handles and the plugin-side service traits.
//!
//! A [`PluginHandle`] is an opaque reference to a loaded plugin plus the set
//! of [`ServiceContract`]s it declares. A contract is declared only by
//! attaching its implementation, so every declared contract can be served.
//! The set is frozen once the handle is built, so handles can be shared
//! freely across every serve loop without locking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::contract::ServiceContract;
use crate::error::{CoreError, CoreResult};
use crate::proto::packages::{
    AddPackageRepositoryRequest, AddPackageRepositoryResponse,
    GetAvailablePackageSummariesRequest, GetAvailablePackageSummariesResponse,
    GetInstalledPackageSummariesRequest, GetInstalledPackageSummariesResponse,
    GetPackageRepositorySummariesRequest, GetPackageRepositorySummariesResponse,
};
use crate::proto::plugins::Plugin;

/// Declared capability set of a plugin.
pub type CapabilitySet = BTreeSet<ServiceContract>;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin-side service traits
// ─────────────────────────────────────────────────────────────────────────────

/// Implemented by plugins that serve the core packages contract. Methods a
/// plugin does not override answer `UNIMPLEMENTED`.
#[async_trait]
pub trait PackagesPlugin: Send + Sync {
    async fn get_available_package_summaries(
        &self,
        _request: Request<GetAvailablePackageSummariesRequest>,
    ) -> Result<Response<GetAvailablePackageSummariesResponse>, Status> {
        Err(Status::unimplemented("GetAvailablePackageSummaries is not implemented"))
    }

    async fn get_installed_package_summaries(
        &self,
        _request: Request<GetInstalledPackageSummariesRequest>,
    ) -> Result<Response<GetInstalledPackageSummariesResponse>, Status> {
        Err(Status::unimplemented("GetInstalledPackageSummaries is not implemented"))
    }
}

/// Implemented by plugins that serve the core repositories contract.
/// Methods a plugin does not override answer `UNIMPLEMENTED`.
#[async_trait]
pub trait RepositoriesPlugin: Send + Sync {
    async fn get_package_repository_summaries(
        &self,
        _request: Request<GetPackageRepositorySummariesRequest>,
    ) -> Result<Response<GetPackageRepositorySummariesResponse>, Status> {
        Err(Status::unimplemented("GetPackageRepositorySummaries is not implemented"))
    }

    async fn add_package_repository(
        &self,
        _request: Request<AddPackageRepositoryRequest>,
    ) -> Result<Response<AddPackageRepositoryResponse>, Status> {
        Err(Status::unimplemented("AddPackageRepository is not implemented"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PluginDescriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Name and version of a loaded plugin, e.g. `helm.packages` / `v1alpha1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Whether this descriptor identifies the plugin named in a request.
    pub fn matches(&self, plugin: &Plugin) -> bool {
        self.name == plugin.name && (plugin.version.is_empty() || self.version == plugin.version)
    }

    /// The wire representation used in RPC messages.
    pub fn to_proto(&self) -> Plugin {
        Plugin {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PluginHandle
// ─────────────────────────────────────────────────────────────────────────────

/// A loaded plugin together with its declared capability set.
#[derive(Clone)]
pub struct PluginHandle {
    descriptor: PluginDescriptor,
    capabilities: CapabilitySet,
    packages: Option<Arc<dyn PackagesPlugin>>,
    repositories: Option<Arc<dyn RepositoriesPlugin>>,
}

impl PluginHandle {
    /// Start building a handle for the plugin `name` at `version`.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> PluginHandleBuilder {
        PluginHandleBuilder {
            descriptor: PluginDescriptor::new(name, version),
            capabilities: CapabilitySet::new(),
            packages: None,
            repositories: None,
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Whether the plugin declared `contract` at load time.
    pub fn implements(&self, contract: ServiceContract) -> bool {
        self.capabilities.contains(&contract)
    }

    /// The packages implementation, present when [`ServiceContract::Packages`]
    /// was declared through [`PluginHandleBuilder::packages`].
    pub fn packages(&self) -> Option<&Arc<dyn PackagesPlugin>> {
        self.packages.as_ref()
    }

    /// The repositories implementation, present when
    /// [`ServiceContract::Repositories`] was declared through
    /// [`PluginHandleBuilder::repositories`].
    pub fn repositories(&self) -> Option<&Arc<dyn RepositoriesPlugin>> {
        self.repositories.as_ref()
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("descriptor", &self.descriptor)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Builder for [`PluginHandle`]; the capability set is frozen by [`build`](Self::build).
pub struct PluginHandleBuilder {
    descriptor: PluginDescriptor,
    capabilities: CapabilitySet,
    packages: Option<Arc<dyn PackagesPlugin>>,
    repositories: Option<Arc<dyn RepositoriesPlugin>>,
}

impl PluginHandleBuilder {
    /// Attach a packages implementation and declare [`ServiceContract::Packages`].
    pub fn packages(mut self, service: impl PackagesPlugin + 'static) -> Self {
        self.packages = Some(Arc::new(service));
        self.capabilities.insert(ServiceContract::Packages);
        self
    }

    /// Attach a repositories implementation and declare
    /// [`ServiceContract::Repositories`].
    pub fn repositories(mut self, service: impl RepositoriesPlugin + 'static) -> Self {
        self.repositories = Some(Arc::new(service));
        self.capabilities.insert(ServiceContract::Repositories);
        self
    }

    pub fn build(self) -> PluginHandle {
        PluginHandle {
            descriptor: self.descriptor,
            capabilities: self.capabilities,
            packages: self.packages,
            repositories: self.repositories,
        }
    }
}

/// Reject empty names and duplicate name/version pairs.
pub fn validate_plugin_set(plugins: &[PluginHandle]) -> CoreResult<()> {
    let mut seen = HashSet::with_capacity(plugins.len());
    for plugin in plugins {
        if plugin.descriptor.name.trim().is_empty() {
            return Err(CoreError::EmptyPluginName);
        }
        if !seen.insert(&plugin.descriptor) {
            return Err(CoreError::DuplicatePlugin(plugin.descriptor.to_string()));
        }
    }
    Ok(())
}
