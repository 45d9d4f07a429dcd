//! `kubeappsapis.core.packages.v1alpha1`
//!
//! Messages of the core packages and repositories services. Only the
//! summary and registration calls routed by the ingress are modelled.

pub use super::generated::kubeappsapis::core::packages::v1alpha1::installed_package_status::StatusReason;
pub use super::generated::kubeappsapis::core::packages::v1alpha1::*;

pub const PACKAGES_SERVICE: &str = "kubeappsapis.core.packages.v1alpha1.PackagesService";
pub const REPOSITORIES_SERVICE: &str = "kubeappsapis.core.packages.v1alpha1.RepositoriesService";

pub const GET_AVAILABLE_PACKAGE_SUMMARIES: &str =
    "/kubeappsapis.core.packages.v1alpha1.PackagesService/GetAvailablePackageSummaries";
pub const GET_INSTALLED_PACKAGE_SUMMARIES: &str =
    "/kubeappsapis.core.packages.v1alpha1.PackagesService/GetInstalledPackageSummaries";
pub const GET_PACKAGE_REPOSITORY_SUMMARIES: &str =
    "/kubeappsapis.core.packages.v1alpha1.RepositoriesService/GetPackageRepositorySummaries";
pub const ADD_PACKAGE_REPOSITORY: &str =
    "/kubeappsapis.core.packages.v1alpha1.RepositoriesService/AddPackageRepository";

crate::proto::json::proto_enum!(StatusReason);
