//! `kubeappsapis.core.plugins.v1alpha1`

pub use super::generated::kubeappsapis::core::plugins::v1alpha1::*;

pub const PLUGINS_SERVICE: &str = "kubeappsapis.core.plugins.v1alpha1.PluginsService";

pub const GET_CONFIGURED_PLUGINS: &str =
    "/kubeappsapis.core.plugins.v1alpha1.PluginsService/GetConfiguredPlugins";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn configured_plugins_are_written_in_camel_case() {
        let response = GetConfiguredPluginsResponse {
            plugins: vec![Plugin {
                name: "helm.packages".into(),
                version: "v1alpha1".into(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "plugins": [{ "name": "helm.packages", "version": "v1alpha1" }] })
        );
        assert_eq!(
            serde_json::to_value(GetConfiguredPluginsResponse::default()).unwrap(),
            json!({})
        );
    }
}
