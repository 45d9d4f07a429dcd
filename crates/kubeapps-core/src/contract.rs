//! Core service contracts.
//!
//! A [`ServiceContract`] names one core RPC service interface. It is used
//! purely as a lookup key: plugins declare the contracts they implement and
//! the capability router filters on them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::proto::{packages, plugins};

/// Identifies one core service interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ServiceContract {
    /// `kubeappsapis.core.packages.v1alpha1.PackagesService`
    Packages,
    /// `kubeappsapis.core.packages.v1alpha1.RepositoriesService`
    Repositories,
    /// `kubeappsapis.core.plugins.v1alpha1.PluginsService`
    Plugins,
}

impl ServiceContract {
    /// Every known contract, in declaration order.
    pub const ALL: [ServiceContract; 3] = [
        ServiceContract::Packages,
        ServiceContract::Repositories,
        ServiceContract::Plugins,
    ];

    /// Fully qualified RPC service name of this contract.
    pub fn service_name(self) -> &'static str {
        match self {
            ServiceContract::Packages => packages::PACKAGES_SERVICE,
            ServiceContract::Repositories => packages::REPOSITORIES_SERVICE,
            ServiceContract::Plugins => plugins::PLUGINS_SERVICE,
        }
    }

    /// Resolve a contract from its fully qualified service name.
    pub fn from_service_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.service_name() == name)
    }
}

impl fmt::Display for ServiceContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}
