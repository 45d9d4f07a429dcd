//! Unary request logging interceptor.
//!
//! Every unary call, whichever protocol carried it, is recorded with its
//! status code, elapsed time and full method path:
//!
//! ```text
//! INFO code=Ok elapsed=97.752µs method=/kubeappsapis.core.packages.v1alpha1.PackagesService/GetAvailablePackageSummaries
//! ```
//!
//! Methods matched by [`RequestLogConfig::quiet_methods`] are recorded at
//! `DEBUG` so frequent polling calls do not flood the log.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonic::{Code, Response, Status};
use tracing::{debug, info};

use super::BoxFuture;
use crate::config::RequestLogConfig;

#[derive(Debug, Clone, Default)]
pub struct RequestLogger {
    quiet_methods: Arc<[String]>,
}

impl RequestLogger {
    pub fn new(config: &RequestLogConfig) -> Self {
        Self {
            quiet_methods: config.quiet_methods.clone().into(),
        }
    }

    /// Whether calls to `method` are logged at the lower verbosity.
    pub fn is_quiet(&self, method: &str) -> bool {
        self.quiet_methods.iter().any(|quiet| method.contains(quiet.as_str()))
    }

    pub fn record(&self, method: &str, code: Code, elapsed: Duration) {
        if self.is_quiet(method) {
            debug!(code = ?code, elapsed = ?elapsed, method, "request");
        } else {
            info!(code = ?code, elapsed = ?elapsed, method, "request");
        }
    }

    /// Wrap a call so its outcome is recorded when it completes.
    pub(crate) fn instrument<T, F>(&self, method: Arc<str>, call: F) -> BoxFuture<Result<Response<T>, Status>>
    where
        T: Send + 'static,
        F: Future<Output = Result<Response<T>, Status>> + Send + 'static,
    {
        let logger = self.clone();
        Box::pin(async move {
            let start = Instant::now();
            let result = call.await;
            let code = match &result {
                Ok(_) => Code::Ok,
                Err(status) => status.code(),
            };
            logger.record(&method, code, start.elapsed());
            result
        })
    }
}
