//! `kubeappsapis.core.plugins.v1alpha1.PluginsService`

use kubeapps_core::capability::plugins_satisfying;
use kubeapps_core::proto::plugins::{
    GET_CONFIGURED_PLUGINS, GetConfiguredPluginsRequest, GetConfiguredPluginsResponse,
};
use kubeapps_core::{CoreResult, PluginHandle, ServiceContract, validate_plugin_set};
use std::sync::Arc;
use tonic::{Request, Response};

use crate::rpc::{RegistryError, RpcRegistry};

/// Lists the loaded plugins and resolves which of them serve a contract.
#[derive(Debug)]
pub struct PluginsServer {
    plugins: Vec<PluginHandle>,
}

impl PluginsServer {
    pub fn new(plugins: &[PluginHandle]) -> CoreResult<Self> {
        validate_plugin_set(plugins)?;
        Ok(Self {
            plugins: plugins.to_vec(),
        })
    }

    /// Every loaded plugin, in load order.
    pub fn get_configured_plugins(&self, _request: &GetConfiguredPluginsRequest) -> GetConfiguredPluginsResponse {
        GetConfiguredPluginsResponse {
            plugins: self.plugins.iter().map(|p| p.descriptor().to_proto()).collect(),
        }
    }

    pub fn plugins_satisfying(&self, contract: ServiceContract) -> Vec<PluginHandle> {
        plugins_satisfying(contract, &self.plugins)
    }

    pub fn register(self: Arc<Self>, registry: &mut RpcRegistry) -> Result<(), RegistryError> {
        registry.unary(
            GET_CONFIGURED_PLUGINS,
            move |request: Request<GetConfiguredPluginsRequest>| {
                let response = self.get_configured_plugins(request.get_ref());
                async move { Ok(Response::new(response)) }
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kubeapps_core::{CoreError, PackagesPlugin};

    struct Helm;

    #[async_trait]
    impl PackagesPlugin for Helm {}

    #[test]
    fn configured_plugins_keep_load_order() {
        let server = PluginsServer::new(&[
            PluginHandle::builder("kapp_controller.packages", "v1alpha1").build(),
            PluginHandle::builder("helm.packages", "v1alpha1")
                .packages(Helm)
                .build(),
        ])
        .unwrap();

        let names: Vec<_> = server
            .get_configured_plugins(&GetConfiguredPluginsRequest {})
            .plugins
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["kapp_controller.packages", "helm.packages"]);

        let packaging = server.plugins_satisfying(ServiceContract::Packages);
        assert_eq!(packaging.len(), 1);
        assert_eq!(packaging[0].name(), "helm.packages");
    }

    #[test]
    fn duplicate_plugins_fail_construction() {
        let plugin = PluginHandle::builder("helm.packages", "v1alpha1").build();
        assert!(matches!(
            PluginsServer::new(&[plugin.clone(), plugin]),
            Err(CoreError::DuplicatePlugin(_))
        ));
    }
}
