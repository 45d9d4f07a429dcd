//! Error types for the ingress.
//!
//! [`ServeError`] is what [`crate::server::Server::bootstrap`] and
//! [`crate::server::Server::run`] return: either a startup failure (nothing
//! is left running) or the fatal exit of a serve loop. Per-request failures
//! never surface here; every protocol answers them with its own error
//! convention.

use kubeapps_core::CoreError;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::rpc::RegistryError;

/// Startup or fatal serve-loop error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServeError {
    /// A listener could not be bound.
    #[error("failed to bind {listener} listener on {addr}: {source}")]
    Bind {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The plugin set or a core service could not be constructed.
    #[error("failed to initialize {service}: {source}")]
    Service {
        service: &'static str,
        #[source]
        source: CoreError,
    },

    /// An RPC method could not be registered.
    #[error("failed to register {service}: {source}")]
    Register {
        service: &'static str,
        #[source]
        source: RegistryError,
    },

    /// A REST binding could not be registered on the gateway.
    #[error("failed to register {service} handler for gateway: {source}")]
    Gateway {
        service: &'static str,
        #[source]
        source: GatewayError,
    },

    /// The reflection service could not read the descriptor set.
    #[error("failed to build the reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// A serve loop stopped; the server no longer accepts all traffic.
    #[error(transparent)]
    LoopExited(#[from] FatalError),
}

/// Published by a serve loop when it stops.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{task} stopped serving: {reason}")]
pub struct FatalError {
    pub task: &'static str,
    pub reason: String,
}

impl FatalError {
    pub fn new(task: &'static str, reason: impl ToString) -> Self {
        Self {
            task,
            reason: reason.to_string(),
        }
    }
}
