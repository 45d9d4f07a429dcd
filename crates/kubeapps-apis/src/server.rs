//! Server bootstrap.
//!
//! [`Server::bootstrap`] builds both RPC generations and starts everything
//! behind the front door:
//!
//! 1. bind the front door and the legacy listener (ephemeral, loopback only);
//! 2. build the REST/JSON gateway, pointed at the front door;
//! 3. build the plugins service on the front door, next to the health check;
//! 4. resolve the packages and repositories plugins and register those
//!    services on the legacy binary-RPC server and on the gateway, next to
//!    server reflection;
//! 5. start the legacy demultiplexer, its three serve loops and the bridge.
//!
//! Any failure aborts bootstrap and drops whatever was started.
//! [`Server::run`] then serves the front door until a serve loop stops.

use axum::Router;
use kubeapps_core::{PluginHandle, ServiceContract};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::{Bridge, BridgeStats};
use crate::cluster::ClusterClientProvider;
use crate::config::ServeConfig;
use crate::demux::{CloseHandle, Demux};
use crate::error::{FatalError, ServeError};
use crate::front_door::front_door;
use crate::gateway::{
    DialOptions, GatewayLinkage, register_docs_handlers, register_operator_logo_handler,
    register_packages_service_handler, register_plugins_service_handler,
    register_repositories_service_handler,
};
use crate::health::StaticChecker;
use crate::legacy::LegacyHttpHandler;
use crate::rpc::{RequestLogger, RpcRegistry, UnifiedHandler};
use crate::services::{PackagesServer, PluginsServer, RepositoriesServer};
use crate::supervisor::Supervisor;
use crate::transport::serve_connections;

const PLUGINS_SERVICE: &str = "core.plugins.v1alpha1";
const PACKAGES_SERVICE: &str = "core.packages.v1alpha1";
const REPOSITORIES_SERVICE: &str = "core.packages.v1alpha1 repositories";
const REFLECTION_SERVICE: &str = "grpc.reflection.v1";

/// A bootstrapped server whose legacy generation is already serving.
pub struct Server {
    config: ServeConfig,
    lifetime: CancellationToken,
    listener: TcpListener,
    router: Router,
    front_door_addr: SocketAddr,
    legacy_addr: SocketAddr,
    legacy_close: CloseHandle,
    bridge_stats: BridgeStats,
    supervisor: Supervisor,
}

impl Server {
    pub async fn bootstrap(config: ServeConfig, plugins: Vec<PluginHandle>) -> Result<Self, ServeError> {
        let lifetime = CancellationToken::new();
        let logger = RequestLogger::new(&config.request_log);

        // 1. Listeners and the legacy binary-RPC registry.
        let listener = bind("front door", SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port))).await?;
        let front_door_addr = listener.local_addr()?;
        let legacy_listener = bind("legacy", SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
        let mut legacy = RpcRegistry::new(logger.clone());

        // 2. Gateway, dialing the front door over loopback.
        let backend = SocketAddr::from((Ipv4Addr::LOCALHOST, front_door_addr.port()));
        let mut linkage = GatewayLinkage::new(lifetime.clone(), backend, DialOptions::default());
        register_docs_handlers(&mut linkage.mux, &config.docs_dir).map_err(gateway_error("docs"))?;
        let cluster = Arc::new(ClusterClientProvider::new(config.cluster_source()));
        register_operator_logo_handler(&mut linkage.mux, cluster).map_err(gateway_error("operator logo"))?;

        // 3. New generation: plugins service and health.
        let plugins_server = Arc::new(PluginsServer::new(&plugins).map_err(|source| ServeError::Service {
            service: PLUGINS_SERVICE,
            source,
        })?);
        let mut new_generation = RpcRegistry::new(logger);
        plugins_server
            .clone()
            .register(&mut new_generation)
            .map_err(|source| ServeError::Register {
                service: PLUGINS_SERVICE,
                source,
            })?;
        register_plugins_service_handler(&mut linkage).map_err(gateway_error(PLUGINS_SERVICE))?;
        StaticChecker::default()
            .register(&mut new_generation)
            .map_err(|source| ServeError::Register {
                service: "grpc.health.v1",
                source,
            })?;

        // 4. Core services backed by the capable plugins.
        let packaging = plugins_server.plugins_satisfying(ServiceContract::Packages);
        let packages = PackagesServer::new(&packaging).map_err(|source| ServeError::Service {
            service: PACKAGES_SERVICE,
            source,
        })?;
        info!(plugins = packages.plugin_count(), "packages service ready");
        Arc::new(packages)
            .register(&mut legacy)
            .map_err(|source| ServeError::Register {
                service: PACKAGES_SERVICE,
                source,
            })?;
        register_packages_service_handler(&mut linkage).map_err(gateway_error(PACKAGES_SERVICE))?;

        let repository_plugins = plugins_server.plugins_satisfying(ServiceContract::Repositories);
        let repositories = RepositoriesServer::new(&repository_plugins).map_err(|source| ServeError::Service {
            service: REPOSITORIES_SERVICE,
            source,
        })?;
        info!(plugins = repositories.plugin_count(), "repositories service ready");
        Arc::new(repositories)
            .register(&mut legacy)
            .map_err(|source| ServeError::Register {
                service: REPOSITORIES_SERVICE,
                source,
            })?;
        register_repositories_service_handler(&mut linkage).map_err(gateway_error(REPOSITORIES_SERVICE))?;

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(kubeapps_core::proto::FILE_DESCRIPTOR_SET)
            .build_v1()?;
        legacy.service(reflection).map_err(|source| ServeError::Register {
            service: REFLECTION_SERVICE,
            source,
        })?;

        // 5. Legacy generation and the bridge in front of it.
        let legacy = legacy.into_server();
        let legacy_http = LegacyHttpHandler::new(legacy.clone(), linkage.into_router(), &config);
        let (demux, listeners) = Demux::new(legacy_listener, config.sniff_timeout)?;
        let legacy_addr = demux.local_addr();
        let legacy_close = demux.close_handle();
        let bridge = Bridge::new(legacy_addr.port())
            .map_err(|e| ServeError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let bridge_stats = bridge.stats().clone();

        let timeout = config.header_read_timeout;
        let mut supervisor = Supervisor::new();
        supervisor.spawn("demux", demux.serve());
        supervisor.spawn(
            "binary-rpc",
            serve_connections("binary-rpc", listeners.binary, legacy, timeout),
        );
        supervisor.spawn(
            "browser-rpc",
            serve_connections("browser-rpc", listeners.browser, legacy_http.clone(), timeout),
        );
        supervisor.spawn(
            "http",
            serve_connections("http", listeners.http, legacy_http, timeout),
        );

        if config.unsafe_local_dev_kubeconfig {
            warn!(
                "Using the local Kubeconfig file instead of the actual in-cluster's config. \
                 This is not recommended except for development purposes."
            );
        }

        let router = front_door(UnifiedHandler::new(new_generation.into_server()), bridge);
        Ok(Self {
            config,
            lifetime,
            listener,
            router,
            front_door_addr,
            legacy_addr,
            legacy_close,
            bridge_stats,
            supervisor,
        })
    }

    pub fn front_door_addr(&self) -> SocketAddr {
        self.front_door_addr
    }

    pub fn legacy_addr(&self) -> SocketAddr {
        self.legacy_addr
    }

    /// Closes the legacy physical listener; `run` then fails.
    pub fn legacy_close_handle(&self) -> CloseHandle {
        self.legacy_close.clone()
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge_stats.clone()
    }

    /// Serve the front door until any serve loop stops. Never returns `Ok`.
    pub async fn run(self) -> Result<(), ServeError> {
        let Server {
            config,
            lifetime,
            listener,
            router,
            front_door_addr,
            mut supervisor,
            ..
        } = self;

        info!(addr = %front_door_addr, "Starting server");
        let fatal = tokio::select! {
            err = serve_connections("front door", listener, router, config.header_read_timeout) => {
                FatalError::new("front door", err)
            }
            fatal = supervisor.wait() => fatal,
        };

        lifetime.cancel();
        supervisor.abort_all();
        Err(ServeError::LoopExited(fatal))
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("front_door_addr", &self.front_door_addr)
            .field("legacy_addr", &self.legacy_addr)
            .field("tasks", &self.supervisor.tasks())
            .finish()
    }
}

/// Bootstrap and run.
pub async fn serve(config: ServeConfig, plugins: Vec<PluginHandle>) -> Result<(), ServeError> {
    Server::bootstrap(config, plugins).await?.run().await
}

async fn bind(listener: &'static str, addr: SocketAddr) -> Result<TcpListener, ServeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { listener, addr, source })
}

fn gateway_error(service: &'static str) -> impl Fn(crate::gateway::GatewayError) -> ServeError {
    move |source| ServeError::Gateway { service, source }
}
