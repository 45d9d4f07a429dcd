//! Minimal cluster API client.
//!
//! Only raw `GET`s are needed (the operator logo passthrough). The client
//! authenticates either with the pod's service account (in-cluster) or, for
//! local development, with the current context of a kubeconfig file.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Where the client's identity comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterSource {
    /// Service host from the environment, credentials from the service
    /// account mount.
    InCluster,
    /// Current context of a kubeconfig file.
    Kubeconfig(PathBuf),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    #[error("not running in a cluster: {0} is not set")]
    MissingEnv(&'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("invalid {kind} name {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("cluster API returned {status} for {path}")]
    Status {
        status: reqwest::StatusCode,
        path: String,
    },
}

pub type ClusterResult<T> = Result<T, ClusterError>;

const MAX_OBJECT_NAME_LEN: usize = 253;

/// Whether `name` is usable as a namespace or object name: a lowercase
/// RFC 1123 subdomain.
pub fn is_object_name(name: &str) -> bool {
    static SUBDOMAIN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = SUBDOMAIN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
    }) else {
        return false;
    };
    name.len() <= MAX_OBJECT_NAME_LEN && re.is_match(name)
}

/// API path of a subresource of a namespaced object, e.g.
/// `/apis/<group>/<version>/namespaces/<ns>/<resource>/<name>/<subresource>`.
/// `namespace` and `name` usually come from callers and are checked.
pub fn namespaced_subresource_path(
    api: &str,
    namespace: &str,
    resource: &str,
    name: &str,
    subresource: &str,
) -> ClusterResult<String> {
    if !is_object_name(namespace) {
        return Err(ClusterError::InvalidName {
            kind: "namespace",
            name: namespace.to_string(),
        });
    }
    if !is_object_name(name) {
        return Err(ClusterError::InvalidName {
            kind: "object",
            name: name.to_string(),
        });
    }
    Ok(format!(
        "{api}/namespaces/{namespace}/{resource}/{name}/{subresource}"
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Kubeconfig
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: String,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: KubeCluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeCluster {
    server: String,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: KubeContext,
}

#[derive(Debug, Deserialize)]
struct KubeContext {
    cluster: String,
    #[serde(default)]
    user: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: KubeUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeUser {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
}

fn decode_pem(field: &str, data: &str) -> ClusterResult<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| ClusterError::Kubeconfig(format!("{field}: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// ClusterClient
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated client for one cluster API server.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ClusterClient {
    pub async fn load(source: &ClusterSource) -> ClusterResult<Self> {
        match source {
            ClusterSource::InCluster => Self::in_cluster().await,
            ClusterSource::Kubeconfig(path) => Self::from_kubeconfig(path).await,
        }
    }

    async fn in_cluster() -> ClusterResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ClusterError::MissingEnv("KUBERNETES_SERVICE_HOST"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| ClusterError::MissingEnv("KUBERNETES_SERVICE_PORT"))?;
        let host = if host.contains(':') { format!("[{host}]") } else { host };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = read(&dir.join("token")).await?;
        let ca = read(&dir.join("ca.crt")).await?;
        let certificate = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| ClusterError::Credentials(e.to_string()))?;

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(certificate)
            .build()?;
        Ok(Self {
            base: format!("https://{host}:{port}"),
            token: Some(String::from_utf8_lossy(&token).trim().to_string()),
            http,
        })
    }

    async fn from_kubeconfig(path: &Path) -> ClusterResult<Self> {
        let raw = read(path).await?;
        let config: Kubeconfig =
            serde_yaml::from_slice(&raw).map_err(|e| ClusterError::Kubeconfig(e.to_string()))?;

        let context = config
            .contexts
            .iter()
            .find(|c| c.name == config.current_context)
            .ok_or_else(|| {
                ClusterError::Kubeconfig(format!("context '{}' not found", config.current_context))
            })?;
        let cluster = config
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| {
                ClusterError::Kubeconfig(format!("cluster '{}' not found", context.context.cluster))
            })?;
        let user = config
            .users
            .iter()
            .find(|u| u.name == context.context.user)
            .map(|u| &u.user);

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(cluster.cluster.insecure_skip_tls_verify);
        if let Some(ca) = &cluster.cluster.certificate_authority_data {
            let pem = decode_pem("certificate-authority-data", ca)?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ClusterError::Credentials(e.to_string()))?;
            builder = builder.add_root_certificate(certificate);
        }
        if let Some(KubeUser {
            client_certificate_data: Some(cert),
            client_key_data: Some(key),
            ..
        }) = user
        {
            let mut pem = decode_pem("client-certificate-data", cert)?;
            pem.extend_from_slice(b"\n");
            pem.extend(decode_pem("client-key-data", key)?);
            let identity =
                reqwest::Identity::from_pem(&pem).map_err(|e| ClusterError::Credentials(e.to_string()))?;
            builder = builder.identity(identity);
        }

        debug!(context = %context.name, server = %cluster.cluster.server, "using kubeconfig credentials");
        Ok(Self {
            base: cluster.cluster.server.trim_end_matches('/').to_string(),
            token: user.and_then(|u| u.token.clone()),
            http: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// `GET` an API path (starting with `/`) and return the raw body.
    pub async fn get_raw(&self, path: &str) -> ClusterResult<Bytes> {
        let mut request = self.http.get(format!("{}{path}", self.base));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClusterError::Status {
                status,
                path: path.to_string(),
            });
        }
        Ok(response.bytes().await?)
    }
}

async fn read(path: &Path) -> ClusterResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| ClusterError::Read {
        path: path.to_path_buf(),
        source,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// ClusterClientProvider
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the [`ClusterClient`] on first use. A failed build is reported to
/// the caller that triggered it and attempted again on the next call.
#[derive(Debug)]
pub struct ClusterClientProvider {
    source: ClusterSource,
    client: OnceCell<ClusterClient>,
}

impl ClusterClientProvider {
    pub fn new(source: ClusterSource) -> Self {
        Self {
            source,
            client: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &ClusterSource {
        &self.source
    }

    pub async fn client(&self) -> ClusterResult<&ClusterClient> {
        self.client
            .get_or_try_init(|| ClusterClient::load(&self.source))
            .await
    }
}
