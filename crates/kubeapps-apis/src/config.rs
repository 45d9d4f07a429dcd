//! Server configuration.
//!
//! [`ServeConfig`] is built once at process start from, in increasing order
//! of precedence, the built-in defaults, an optional configuration file and
//! command-line flags. It is immutable once bootstrap begins.
//!
//! Configuration files may be TOML, YAML or JSON (detected from the file
//! extension) and may reference environment variables with `${VAR}`.

use config::{Config as Cfg, File, FileFormat};
use kubeapps_core::loader::PluginConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::cluster::ClusterSource;

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("config parsing error: {0}")]
    Parse(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// ─────────────────────────────────────────────────────────────────────────────
// Origin policy
// ─────────────────────────────────────────────────────────────────────────────

/// Which `Origin` values browser-RPC traffic is accepted from.
///
/// Written as `"any"` or `{ allow = ["https://kubeapps.example"] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginPolicy {
    /// Accept every origin.
    #[default]
    Any,
    /// Accept only the listed origins (exact, case-insensitive match).
    Allow(Vec<String>),
}

impl OriginPolicy {
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::Allow(origins) => origins.iter().any(|o| o.eq_ignore_ascii_case(origin)),
        }
    }

    /// Requests without an `Origin` header come from non-browser clients;
    /// they are only accepted when every origin is.
    pub fn allows_missing(&self) -> bool {
        matches!(self, OriginPolicy::Any)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request logging
// ─────────────────────────────────────────────────────────────────────────────

/// Per-method verbosity of the unary request logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLogConfig {
    /// Calls whose full method path contains one of these strings are logged
    /// at `DEBUG` instead of `INFO`.
    pub quiet_methods: Vec<String>,
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            quiet_methods: vec!["GetConfiguredPlugins".to_string()],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServeConfig
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_WEBSOCKET_MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

/// Everything [`crate::server::Server::bootstrap`] needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Externally bound port of the front door (default: 50051).
    pub port: u16,
    /// Plugin source, consumed by the plugin loader.
    pub plugins: PluginConfig,
    /// Use local developer credentials instead of the in-cluster identity.
    pub unsafe_local_dev_kubeconfig: bool,
    /// Kubeconfig used with `unsafe_local_dev_kubeconfig`. Falls back to
    /// `$KUBECONFIG`, then `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
    /// HTTP/1 header read timeout of every HTTP server (default: 60s).
    #[serde(with = "duration_secs")]
    pub header_read_timeout: Duration,
    /// Upper bound on classifying one legacy connection (default: 10s).
    #[serde(with = "duration_secs")]
    pub sniff_timeout: Duration,
    /// Directory holding `kubeapps-apis.swagger.json` and `index.html`.
    pub docs_dir: PathBuf,
    /// Origins accepted for browser-RPC and its CORS preflights.
    pub origins: OriginPolicy,
    /// Origins accepted for browser-RPC WebSocket upgrades.
    pub websocket_origins: OriginPolicy,
    /// Largest request body accepted over one browser-RPC WebSocket
    /// (default: 4 MiB). Sockets exceeding it are closed.
    pub websocket_max_request_bytes: usize,
    pub request_log: RequestLogConfig,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 50051,
            plugins: PluginConfig::default(),
            unsafe_local_dev_kubeconfig: false,
            kubeconfig: None,
            header_read_timeout: Duration::from_secs(60),
            sniff_timeout: Duration::from_secs(10),
            docs_dir: PathBuf::from("docs"),
            origins: OriginPolicy::Any,
            websocket_origins: OriginPolicy::Any,
            websocket_max_request_bytes: DEFAULT_WEBSOCKET_MAX_REQUEST_BYTES,
            request_log: RequestLogConfig::default(),
        }
    }
}

impl ServeConfig {
    /// Load a configuration file on top of the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, format)
    }

    /// Parse configuration text in `format` on top of the defaults.
    pub fn parse(content: &str, format: FileFormat) -> ConfigResult<Self> {
        let substituted = substitute_env_vars(content);
        Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Where the cluster API client takes its identity from.
    pub fn cluster_source(&self) -> ClusterSource {
        if !self.unsafe_local_dev_kubeconfig {
            return ClusterSource::InCluster;
        }
        let path = self
            .kubeconfig
            .clone()
            .or_else(|| std::env::var_os("KUBECONFIG").map(PathBuf::from))
            .or_else(|| std::env::var_os("HOME").map(|home| Path::new(&home).join(".kube/config")))
            .unwrap_or_else(|| PathBuf::from(".kube/config"));
        ClusterSource::Kubeconfig(path)
    }
}

/// Detect the configuration format from the file extension.
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("no file extension found".to_string()))?;
    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Replace `${VAR}` references with the variable's value. Unset variables
/// are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    static BRACED: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = BRACED.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok()) else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

/// Durations written as (fractional) seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
