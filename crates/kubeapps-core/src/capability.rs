//! Capability router.
//!
//! Resolves which loaded plugins satisfy a [`ServiceContract`] by consulting
//! each handle's declared capability set. The result keeps the relative
//! order of the input so registration order, and with it the tie-break
//! between plugins claiming the same contract, is reproducible.

use crate::contract::ServiceContract;
use crate::plugin::PluginHandle;

/// Return the plugins whose capability set includes `contract`, in input
/// order. An empty result means no plugin serves the contract; it is not an
/// error.
pub fn plugins_satisfying(contract: ServiceContract, plugins: &[PluginHandle]) -> Vec<PluginHandle> {
    plugins
        .iter()
        .filter(|p| p.implements(contract))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PackagesPlugin, RepositoriesPlugin};
    use async_trait::async_trait;

    struct Packages;
    struct Repositories;

    #[async_trait]
    impl PackagesPlugin for Packages {}

    #[async_trait]
    impl RepositoriesPlugin for Repositories {}

    fn handle(name: &str, contracts: &[ServiceContract]) -> PluginHandle {
        contracts
            .iter()
            .fold(PluginHandle::builder(name, "v1alpha1"), |b, c| match c {
                ServiceContract::Packages => b.packages(Packages),
                ServiceContract::Repositories => b.repositories(Repositories),
                ServiceContract::Plugins => b,
            })
            .build()
    }

    fn names(plugins: &[PluginHandle]) -> Vec<&str> {
        plugins.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn filters_by_declared_contract_preserving_order() {
        let plugins = vec![
            handle("kapp", &[ServiceContract::Packages, ServiceContract::Repositories]),
            handle("flux", &[ServiceContract::Repositories]),
            handle("helm", &[ServiceContract::Packages]),
            handle("resources", &[]),
        ];

        let packaging = plugins_satisfying(ServiceContract::Packages, &plugins);
        assert_eq!(names(&packaging), vec!["kapp", "helm"]);

        let repos = plugins_satisfying(ServiceContract::Repositories, &plugins);
        assert_eq!(names(&repos), vec!["kapp", "flux"]);
    }

    #[test]
    fn no_match_is_an_empty_result() {
        let plugins = vec![handle("resources", &[])];
        assert!(plugins_satisfying(ServiceContract::Packages, &plugins).is_empty());
        assert!(plugins_satisfying(ServiceContract::Packages, &[]).is_empty());
    }

    #[test]
    fn resolution_is_idempotent() {
        let plugins = vec![
            handle("b", &[ServiceContract::Packages]),
            handle("a", &[ServiceContract::Packages]),
        ];
        let first = plugins_satisfying(ServiceContract::Packages, &plugins);
        let second = plugins_satisfying(ServiceContract::Packages, &plugins);
        assert_eq!(names(&first), names(&second));
        assert_eq!(names(&first), vec!["b", "a"]);
    }
}
