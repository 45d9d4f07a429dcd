//! `kubeapps-apis`: the network ingress of the Kubeapps APIs service.
//!
//! One externally bound port serves every generation of the RPC API:
//!
//! | Client | Served by |
//! |--------|-----------|
//! | gRPC, gRPC-Web and Connect calls to the plugins service and health | [`front_door`], in place |
//! | gRPC calls to the packages and repositories services | [`bridge`] → [`demux`] → legacy [`rpc::RpcServer`] |
//! | gRPC-Web (also over WebSocket) to those services | [`bridge`] → [`demux`] → [`legacy::LegacyHttpHandler`] |
//! | REST/JSON | [`bridge`] → [`demux`] → [`gateway`] → front door |
//!
//! Which plugin implements which service is decided once at startup by
//! [`kubeapps_core::capability`]; see [`server::Server::bootstrap`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use kubeapps_apis::config::ServeConfig;
//! use kubeapps_apis::server::serve;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServeConfig { port: 50051, ..Default::default() };
//!     if let Err(e) = serve(config, Vec::new()).await {
//!         eprintln!("{e}");
//!     }
//! }
//! ```

pub mod bridge;
pub mod cluster;
pub mod config;
pub mod demux;
pub mod error;
pub mod front_door;
pub mod gateway;
pub mod health;
pub mod legacy;
pub mod rpc;
pub mod server;
pub mod services;
pub mod supervisor;
pub mod transport;

pub use config::{OriginPolicy, ServeConfig};
pub use error::{FatalError, ServeError};
pub use server::{Server, serve};
