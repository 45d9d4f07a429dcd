//! `grpc.health.v1.Health` with a static checker.
//!
//! The front door is healthy as soon as it serves: the overall server (empty
//! service name) and every monitored service report `SERVING`, anything
//! else is `NOT_FOUND`.
//!
//! `Watch` is registered but answers `UNIMPLEMENTED`; clients poll `Check`.

use kubeapps_core::proto::health::{CHECK, HealthCheckRequest, HealthCheckResponse, ServingStatus, WATCH};
use kubeapps_core::proto::plugins::PLUGINS_SERVICE;
use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::rpc::{RegistryError, RpcRegistry};

#[derive(Debug, Clone)]
pub struct StaticChecker {
    services: Arc<[String]>,
}

impl Default for StaticChecker {
    fn default() -> Self {
        Self::new([PLUGINS_SERVICE])
    }
}

impl StaticChecker {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: services.into_iter().map(Into::into).collect(),
        }
    }

    pub fn check(&self, service: &str) -> Result<HealthCheckResponse, Status> {
        if service.is_empty() || self.services.iter().any(|s| s == service) {
            Ok(HealthCheckResponse {
                status: ServingStatus::Serving as i32,
            })
        } else {
            Err(Status::not_found(format!("unknown service {service}")))
        }
    }

    pub fn register(self, registry: &mut RpcRegistry) -> Result<(), RegistryError> {
        registry.unary(CHECK, move |request: Request<HealthCheckRequest>| {
            let result = self.check(&request.get_ref().service).map(Response::new);
            async move { result }
        })?;
        registry.unary(WATCH, |_request: Request<HealthCheckRequest>| async {
            Err::<Response<HealthCheckResponse>, _>(Status::unimplemented("watch is not supported, poll Check"))
        })?;
        Ok(())
    }
}
