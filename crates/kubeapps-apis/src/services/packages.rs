//! `kubeappsapis.core.packages.v1alpha1.PackagesService`

use futures::future::join_all;
use kubeapps_core::proto::packages::{
    GET_AVAILABLE_PACKAGE_SUMMARIES, GET_INSTALLED_PACKAGE_SUMMARIES,
    GetAvailablePackageSummariesRequest, GetAvailablePackageSummariesResponse,
    GetInstalledPackageSummariesRequest, GetInstalledPackageSummariesResponse,
};
use kubeapps_core::{CoreResult, PackagesPlugin, PluginHandle, ServiceContract};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::debug;

use super::{Backend, Page, backends, forward, plugin_error};
use crate::rpc::{RegistryError, RpcRegistry};

/// Aggregates the packages plugins.
pub struct PackagesServer {
    plugins: Vec<Backend<dyn PackagesPlugin>>,
}

impl PackagesServer {
    /// `plugins` must all implement the packages contract; see
    /// [`kubeapps_core::capability::plugins_satisfying`].
    pub fn new(plugins: &[PluginHandle]) -> CoreResult<Self> {
        let plugins = backends(plugins, ServiceContract::Packages, PluginHandle::packages)?;
        Ok(Self { plugins })
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Summaries from every plugin, sorted by display name.
    pub async fn get_available_package_summaries(
        &self,
        request: Request<GetAvailablePackageSummariesRequest>,
    ) -> Result<Response<GetAvailablePackageSummariesResponse>, Status> {
        let (metadata, _, message) = request.into_parts();
        let page = Page::from_options(message.pagination_options.as_ref())?;
        debug!(plugins = self.plugins.len(), ?page, "fetching available package summaries");

        let plugin_request = GetAvailablePackageSummariesRequest {
            pagination_options: page.plugin_options(),
            ..message
        };
        let calls = self.plugins.iter().map(|backend| {
            let request = forward(&metadata, plugin_request.clone());
            async move { (backend, backend.service.get_available_package_summaries(request).await) }
        });

        let mut summaries = Vec::new();
        let mut categories = BTreeSet::new();
        for (backend, result) in join_all(calls).await {
            let response = result
                .map_err(|status| plugin_error("GetAvailablePackageSummaries", &backend.plugin, status))?
                .into_inner();
            summaries.extend(response.available_package_summaries);
            categories.extend(response.categories);
        }
        summaries.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });

        let (available_package_summaries, next_page_token) = page.slice(summaries);
        Ok(Response::new(GetAvailablePackageSummariesResponse {
            available_package_summaries,
            next_page_token,
            categories: categories.into_iter().collect(),
        }))
    }

    /// Installed packages from every plugin, sorted by name.
    pub async fn get_installed_package_summaries(
        &self,
        request: Request<GetInstalledPackageSummariesRequest>,
    ) -> Result<Response<GetInstalledPackageSummariesResponse>, Status> {
        let (metadata, _, message) = request.into_parts();
        let page = Page::from_options(message.pagination_options.as_ref())?;

        let plugin_request = GetInstalledPackageSummariesRequest {
            pagination_options: page.plugin_options(),
            ..message
        };
        let calls = self.plugins.iter().map(|backend| {
            let request = forward(&metadata, plugin_request.clone());
            async move { (backend, backend.service.get_installed_package_summaries(request).await) }
        });

        let mut summaries = Vec::new();
        for (backend, result) in join_all(calls).await {
            let response = result
                .map_err(|status| plugin_error("GetInstalledPackageSummaries", &backend.plugin, status))?
                .into_inner();
            summaries.extend(response.installed_package_summaries);
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));

        let (installed_package_summaries, next_page_token) = page.slice(summaries);
        Ok(Response::new(GetInstalledPackageSummariesResponse {
            installed_package_summaries,
            next_page_token,
        }))
    }

    pub fn register(self: Arc<Self>, registry: &mut RpcRegistry) -> Result<(), RegistryError> {
        let server = self.clone();
        registry.unary(
            GET_AVAILABLE_PACKAGE_SUMMARIES,
            move |request: Request<GetAvailablePackageSummariesRequest>| {
                let server = server.clone();
                async move { server.get_available_package_summaries(request).await }
            },
        )?;
        registry.unary(
            GET_INSTALLED_PACKAGE_SUMMARIES,
            move |request: Request<GetInstalledPackageSummariesRequest>| {
                let server = self.clone();
                async move { server.get_installed_package_summaries(request).await }
            },
        )?;
        Ok(())
    }
}

impl fmt::Debug for PackagesServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins: Vec<_> = self.plugins.iter().map(|b| b.plugin.to_string()).collect();
        f.debug_struct("PackagesServer").field("plugins", &plugins).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kubeapps_core::CoreError;
    use kubeapps_core::proto::packages::{
        AvailablePackageSummary, InstalledPackageSummary, PaginationOptions,
    };
    use tonic::Code;

    struct Catalog {
        packages: Vec<(&'static str, &'static str)>,
        categories: Vec<&'static str>,
        fail: Option<Code>,
    }

    impl Catalog {
        fn new(packages: &[(&'static str, &'static str)], categories: &[&'static str]) -> Self {
            Self {
                packages: packages.to_vec(),
                categories: categories.to_vec(),
                fail: None,
            }
        }
    }

    #[async_trait]
    impl PackagesPlugin for Catalog {
        async fn get_available_package_summaries(
            &self,
            request: Request<GetAvailablePackageSummariesRequest>,
        ) -> Result<Response<GetAvailablePackageSummariesResponse>, Status> {
            if let Some(code) = self.fail {
                return Err(Status::new(code, "boom"));
            }
            let limit = match request.get_ref().pagination_options.as_ref() {
                Some(options) => options.page_size as usize,
                None => usize::MAX,
            };
            Ok(Response::new(GetAvailablePackageSummariesResponse {
                available_package_summaries: self
                    .packages
                    .iter()
                    .take(limit)
                    .map(|(name, display)| AvailablePackageSummary {
                        name: name.to_string(),
                        display_name: display.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                categories: self.categories.iter().map(|c| c.to_string()).collect(),
                ..Default::default()
            }))
        }

        async fn get_installed_package_summaries(
            &self,
            request: Request<GetInstalledPackageSummariesRequest>,
        ) -> Result<Response<GetInstalledPackageSummariesResponse>, Status> {
            let token = request.metadata().get("authorization").cloned();
            Ok(Response::new(GetInstalledPackageSummariesResponse {
                installed_package_summaries: self
                    .packages
                    .iter()
                    .map(|(name, _)| InstalledPackageSummary {
                        name: name.to_string(),
                        short_description: token
                            .as_ref()
                            .and_then(|t| t.to_str().ok())
                            .unwrap_or_default()
                            .to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }))
        }
    }

    fn server(catalogs: Vec<(&str, Catalog)>) -> PackagesServer {
        let handles: Vec<_> = catalogs
            .into_iter()
            .map(|(name, catalog)| PluginHandle::builder(name, "v1alpha1").packages(catalog).build())
            .collect();
        PackagesServer::new(&handles).unwrap()
    }

    #[tokio::test]
    async fn no_plugins_is_an_empty_response() {
        let server = PackagesServer::new(&[]).unwrap();
        let response = server
            .get_available_package_summaries(Request::new(Default::default()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response, GetAvailablePackageSummariesResponse::default());
    }

    #[tokio::test]
    async fn summaries_are_merged_and_sorted() {
        let server = server(vec![
            ("helm.packages", Catalog::new(&[("wordpress", "WordPress"), ("apache", "Apache")], &["CMS", "Infra"])),
            ("kapp_controller.packages", Catalog::new(&[("zookeeper", "ZooKeeper"), ("mariadb", "mariadb")], &["Database", "CMS"])),
        ]);
        let response = server
            .get_available_package_summaries(Request::new(Default::default()))
            .await
            .unwrap()
            .into_inner();

        let names: Vec<_> = response.available_package_summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["apache", "mariadb", "wordpress", "zookeeper"]);
        assert_eq!(response.categories, vec!["CMS", "Database", "Infra"]);
        assert!(response.next_page_token.is_empty());
    }

    #[tokio::test]
    async fn pages_span_plugins() {
        let server = server(vec![
            ("a.packages", Catalog::new(&[("a1", "a1"), ("a2", "a2"), ("a3", "a3")], &[])),
            ("b.packages", Catalog::new(&[("b1", "b1"), ("b2", "b2")], &[])),
        ]);
        let request = GetAvailablePackageSummariesRequest {
            pagination_options: Some(PaginationOptions {
                page_token: "1".into(),
                page_size: 2,
            }),
            ..Default::default()
        };
        let response = server
            .get_available_package_summaries(Request::new(request))
            .await
            .unwrap()
            .into_inner();
        let names: Vec<_> = response.available_package_summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a3", "b1"]);
        assert_eq!(response.next_page_token, "2");
    }

    #[tokio::test]
    async fn first_plugin_error_wins() {
        let mut failing = Catalog::new(&[], &[]);
        failing.fail = Some(Code::Unauthenticated);
        let server = server(vec![
            ("helm.packages", Catalog::new(&[("apache", "Apache")], &[])),
            ("flux.packages", failing),
        ]);
        let status = server
            .get_available_package_summaries(Request::new(Default::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert!(status.message().contains("flux.packages"), "{}", status.message());
    }

    #[tokio::test]
    async fn caller_metadata_reaches_every_plugin() {
        let server = server(vec![
            ("helm.packages", Catalog::new(&[("b", "b")], &[])),
            ("flux.packages", Catalog::new(&[("a", "a")], &[])),
        ]);
        let mut request = Request::new(GetInstalledPackageSummariesRequest::default());
        request
            .metadata_mut()
            .insert("authorization", "Bearer abc".parse().unwrap());
        let response = server
            .get_installed_package_summaries(request)
            .await
            .unwrap()
            .into_inner();
        let summaries = response.installed_package_summaries;
        assert_eq!(summaries[0].name, "a");
        assert!(summaries.iter().all(|s| s.short_description == "Bearer abc"));
    }

    #[test]
    fn plugins_without_an_implementation_are_rejected() {
        let handle = PluginHandle::builder("helm.packages", "v1alpha1").build();
        assert!(matches!(
            PackagesServer::new(&[handle]),
            Err(CoreError::MissingImplementation { .. })
        ));
    }
}
