//! `kubeappsapis.core.packages.v1alpha1.RepositoriesService`

use futures::future::join_all;
use kubeapps_core::proto::packages::{
    ADD_PACKAGE_REPOSITORY, AddPackageRepositoryRequest, AddPackageRepositoryResponse,
    GET_PACKAGE_REPOSITORY_SUMMARIES, GetPackageRepositorySummariesRequest,
    GetPackageRepositorySummariesResponse,
};
use kubeapps_core::{CoreResult, PluginHandle, RepositoriesPlugin, ServiceContract};
use std::fmt;
use std::sync::Arc;
use tonic::{Request, Response, Status};

use super::{Backend, backends, forward, plugin_error};
use crate::rpc::{RegistryError, RpcRegistry};

/// Aggregates the repositories plugins.
pub struct RepositoriesServer {
    plugins: Vec<Backend<dyn RepositoriesPlugin>>,
}

impl RepositoriesServer {
    pub fn new(plugins: &[PluginHandle]) -> CoreResult<Self> {
        let plugins = backends(plugins, ServiceContract::Repositories, PluginHandle::repositories)?;
        Ok(Self { plugins })
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Repository summaries from every plugin, sorted by name.
    pub async fn get_package_repository_summaries(
        &self,
        request: Request<GetPackageRepositorySummariesRequest>,
    ) -> Result<Response<GetPackageRepositorySummariesResponse>, Status> {
        let (metadata, _, message) = request.into_parts();
        let calls = self.plugins.iter().map(|backend| {
            let request = forward(&metadata, message.clone());
            async move { (backend, backend.service.get_package_repository_summaries(request).await) }
        });

        let mut summaries = Vec::new();
        for (backend, result) in join_all(calls).await {
            let response = result
                .map_err(|status| plugin_error("GetPackageRepositorySummaries", &backend.plugin, status))?
                .into_inner();
            summaries.extend(response.package_repository_summaries);
        }
        summaries.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(Response::new(GetPackageRepositorySummariesResponse {
            package_repository_summaries: summaries,
        }))
    }

    /// Route the new repository to the plugin the request names.
    pub async fn add_package_repository(
        &self,
        request: Request<AddPackageRepositoryRequest>,
    ) -> Result<Response<AddPackageRepositoryResponse>, Status> {
        let Some(plugin) = request.get_ref().plugin.clone() else {
            return Err(Status::invalid_argument(
                "Unable to retrieve the plugin (missing AddPackageRepositoryRequest.Plugin)",
            ));
        };
        let backend = self
            .plugins
            .iter()
            .find(|backend| backend.plugin.matches(&plugin))
            .ok_or_else(|| {
                Status::invalid_argument(format!(
                    "Unable to get the plugin {}/{}: no repositories service registered",
                    plugin.name, plugin.version
                ))
            })?;
        backend
            .service
            .add_package_repository(request)
            .await
            .map_err(|status| plugin_error("AddPackageRepository", &backend.plugin, status))
    }

    pub fn register(self: Arc<Self>, registry: &mut RpcRegistry) -> Result<(), RegistryError> {
        let server = self.clone();
        registry.unary(
            GET_PACKAGE_REPOSITORY_SUMMARIES,
            move |request: Request<GetPackageRepositorySummariesRequest>| {
                let server = server.clone();
                async move { server.get_package_repository_summaries(request).await }
            },
        )?;
        registry.unary(
            ADD_PACKAGE_REPOSITORY,
            move |request: Request<AddPackageRepositoryRequest>| {
                let server = self.clone();
                async move { server.add_package_repository(request).await }
            },
        )?;
        Ok(())
    }
}

impl fmt::Debug for RepositoriesServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins: Vec<_> = self.plugins.iter().map(|b| b.plugin.to_string()).collect();
        f.debug_struct("RepositoriesServer").field("plugins", &plugins).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kubeapps_core::proto::packages::{PackageRepositoryReference, PackageRepositorySummary};
    use kubeapps_core::proto::plugins::Plugin;
    use tonic::Code;

    struct Repos {
        names: Vec<&'static str>,
        kind: &'static str,
    }

    #[async_trait]
    impl RepositoriesPlugin for Repos {
        async fn get_package_repository_summaries(
            &self,
            _request: Request<GetPackageRepositorySummariesRequest>,
        ) -> Result<Response<GetPackageRepositorySummariesResponse>, Status> {
            Ok(Response::new(GetPackageRepositorySummariesResponse {
                package_repository_summaries: self
                    .names
                    .iter()
                    .map(|name| PackageRepositorySummary {
                        name: name.to_string(),
                        r#type: self.kind.into(),
                        ..Default::default()
                    })
                    .collect(),
            }))
        }

        async fn add_package_repository(
            &self,
            request: Request<AddPackageRepositoryRequest>,
        ) -> Result<Response<AddPackageRepositoryResponse>, Status> {
            Ok(Response::new(AddPackageRepositoryResponse {
                package_repo_ref: Some(PackageRepositoryReference {
                    identifier: format!("{}/{}", self.kind, request.get_ref().name),
                    ..Default::default()
                }),
            }))
        }
    }

    fn server() -> RepositoriesServer {
        RepositoriesServer::new(&[
            PluginHandle::builder("helm.packages", "v1alpha1")
                .repositories(Repos {
                    names: vec!["bitnami", "Apache"],
                    kind: "helm",
                })
                .build(),
            PluginHandle::builder("flux.packages", "v1alpha1")
                .repositories(Repos {
                    names: vec!["podinfo"],
                    kind: "flux",
                })
                .build(),
        ])
        .unwrap()
    }

    fn add_request(plugin: Option<(&str, &str)>) -> Request<AddPackageRepositoryRequest> {
        Request::new(AddPackageRepositoryRequest {
            name: "stable".into(),
            plugin: plugin.map(|(name, version)| Plugin {
                name: name.into(),
                version: version.into(),
            }),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn summaries_are_sorted_case_insensitively() {
        let response = server()
            .get_package_repository_summaries(Request::new(Default::default()))
            .await
            .unwrap()
            .into_inner();
        let names: Vec<_> = response
            .package_repository_summaries
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["Apache", "bitnami", "podinfo"]);
    }

    #[tokio::test]
    async fn add_is_routed_to_the_named_plugin() {
        let response = server()
            .add_package_repository(add_request(Some(("flux.packages", "v1alpha1"))))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.package_repo_ref.unwrap().identifier, "flux/stable");
    }

    #[tokio::test]
    async fn add_without_a_known_plugin_is_invalid() {
        let missing = server().add_package_repository(add_request(None)).await.unwrap_err();
        assert_eq!(missing.code(), Code::InvalidArgument);
        assert!(missing.message().contains("missing AddPackageRepositoryRequest.Plugin"));

        let unknown = server()
            .add_package_repository(add_request(Some(("carvel.packages", "v1alpha1"))))
            .await
            .unwrap_err();
        assert_eq!(unknown.code(), Code::InvalidArgument);
    }
}
