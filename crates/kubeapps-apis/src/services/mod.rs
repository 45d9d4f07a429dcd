//! Core services.
//!
//! | Service | Generation | Backed by |
//! |---------|------------|-----------|
//! | [`PluginsServer`] | new (front door) | the loaded plugin set |
//! | [`PackagesServer`] | legacy + gateway | plugins satisfying [`ServiceContract::Packages`] |
//! | [`RepositoriesServer`] | legacy + gateway | plugins satisfying [`ServiceContract::Repositories`] |
//!
//! The aggregating services fan each call out to every capable plugin
//! concurrently and merge the answers; a set with no capable plugin is a
//! valid, empty service.

mod packages;
mod plugins;
mod repositories;

pub use packages::PackagesServer;
pub use plugins::PluginsServer;
pub use repositories::RepositoriesServer;

use kubeapps_core::proto::packages::PaginationOptions;
use kubeapps_core::{CoreError, CoreResult, PluginDescriptor, PluginHandle, ServiceContract};
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

/// One plugin's implementation of a contract.
pub(crate) struct Backend<S: ?Sized> {
    pub(crate) plugin: PluginDescriptor,
    pub(crate) service: Arc<S>,
}

/// Collect the `contract` implementations of `plugins`, in order.
pub(crate) fn backends<S: ?Sized>(
    plugins: &[PluginHandle],
    contract: ServiceContract,
    implementation: impl Fn(&PluginHandle) -> Option<&Arc<S>>,
) -> CoreResult<Vec<Backend<S>>> {
    kubeapps_core::validate_plugin_set(plugins)?;
    plugins
        .iter()
        .map(|handle| {
            let service = implementation(handle).cloned().ok_or_else(|| CoreError::MissingImplementation {
                plugin: handle.descriptor().to_string(),
                contract,
            })?;
            Ok(Backend {
                plugin: handle.descriptor().clone(),
                service,
            })
        })
        .collect()
}

/// A plugin-bound request carrying the caller's metadata.
pub(crate) fn forward<T>(metadata: &MetadataMap, message: T) -> Request<T> {
    let mut request = Request::new(message);
    *request.metadata_mut() = metadata.clone();
    request
}

/// A plugin failure, attributed to the plugin with its code preserved.
pub(crate) fn plugin_error(method: &str, plugin: &PluginDescriptor, status: Status) -> Status {
    Status::new(
        status.code(),
        format!(
            "Invalid {method} response from the plugin {}: {}",
            plugin.name,
            status.message()
        ),
    )
}

/// Offset pagination over merged plugin results.
///
/// The page token is the decimal page index; an empty token is the first
/// page and a zero page size means "everything".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Page {
    offset: usize,
    size: usize,
}

impl Page {
    pub(crate) fn from_options(options: Option<&PaginationOptions>) -> Result<Self, Status> {
        let Some(options) = options else {
            return Ok(Page::default());
        };
        let size = usize::try_from(options.page_size)
            .map_err(|_| Status::invalid_argument(format!("invalid page size {}", options.page_size)))?;
        let offset = if options.page_token.is_empty() {
            0
        } else {
            options.page_token.parse().map_err(|_| {
                Status::invalid_argument(format!(
                    "unable to interpret page token '{}'",
                    options.page_token
                ))
            })?
        };
        Ok(Page { offset, size })
    }

    /// What each plugin is asked for: everything up to the end of this page.
    pub(crate) fn plugin_options(&self) -> Option<PaginationOptions> {
        (self.size > 0).then(|| PaginationOptions {
            page_token: String::new(),
            page_size: i32::try_from(self.size.saturating_mul(self.offset + 1)).unwrap_or(i32::MAX),
        })
    }

    /// This page of `items` and the token of the next page (empty when
    /// there is none).
    pub(crate) fn slice<T>(&self, items: Vec<T>) -> (Vec<T>, String) {
        if self.size == 0 {
            return (items, String::new());
        }
        let start = self.offset.saturating_mul(self.size);
        let more = items.len() > start.saturating_add(self.size);
        let page = items.into_iter().skip(start).take(self.size).collect();
        let next = if more { (self.offset + 1).to_string() } else { String::new() };
        (page, next)
    }
}
