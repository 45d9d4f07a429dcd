//! `kubeapps-apis` entry point.
//!
//! Configuration is layered: built-in defaults, then the optional `--config`
//! file, then the flags below. Every flag can also be set through the
//! environment variable shown.
//!
//! | Flag | Variable | Default |
//! |------|----------|---------|
//! | `--port` | `KUBEAPPS_APIS_PORT` | `50051` |
//! | `--plugin-dir` (repeatable) | `KUBEAPPS_APIS_PLUGIN_DIRS` (comma separated) | *(none)* |
//! | `--plugin-config-path` | `KUBEAPPS_APIS_PLUGIN_CONFIG_PATH` | *(none)* |
//! | `--unsafe-local-dev-kubeconfig` | `KUBEAPPS_APIS_UNSAFE_LOCAL_DEV_KUBECONFIG` | `false` |
//! | `--kubeconfig` | `KUBEAPPS_APIS_KUBECONFIG` | `$KUBECONFIG`, then `~/.kube/config` |
//! | `--docs-dir` | `KUBEAPPS_APIS_DOCS_DIR` | `docs` |
//! | `--config` | `KUBEAPPS_APIS_CONFIG` | *(none)* |
//! | `--log-format` | `KUBEAPPS_APIS_LOG_FORMAT` | `text` |
//!
//! Log verbosity follows `RUST_LOG` (default `kubeapps_apis=info`).

use anyhow::Context;
use clap::{Parser, ValueEnum};
use kubeapps_apis::config::ServeConfig;
use kubeapps_apis::server::serve;
use kubeapps_core::loader::{PluginConfig, PluginLoader, StaticPluginLoader};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Kubeapps APIs server.
#[derive(Debug, Parser)]
#[command(name = "kubeapps-apis", version, about)]
struct Cli {
    /// Port the front door listens on.
    #[arg(long, env = "KUBEAPPS_APIS_PORT")]
    port: Option<u16>,

    /// Directory searched for plugins.
    #[arg(long = "plugin-dir", env = "KUBEAPPS_APIS_PLUGIN_DIRS", value_delimiter = ',')]
    plugin_dirs: Vec<PathBuf>,

    /// Plugin-specific configuration file.
    #[arg(long, env = "KUBEAPPS_APIS_PLUGIN_CONFIG_PATH")]
    plugin_config_path: Option<PathBuf>,

    /// Use the local kubeconfig instead of the in-cluster identity.
    #[arg(long, env = "KUBEAPPS_APIS_UNSAFE_LOCAL_DEV_KUBECONFIG")]
    unsafe_local_dev_kubeconfig: bool,

    /// Kubeconfig used with --unsafe-local-dev-kubeconfig.
    #[arg(long, env = "KUBEAPPS_APIS_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Directory holding the API description and documentation page.
    #[arg(long, env = "KUBEAPPS_APIS_DOCS_DIR")]
    docs_dir: Option<PathBuf>,

    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, env = "KUBEAPPS_APIS_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "KUBEAPPS_APIS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn serve_config(&self) -> anyhow::Result<ServeConfig> {
        let mut config = match &self.config {
            Some(path) => ServeConfig::from_file(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => ServeConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if !self.plugin_dirs.is_empty() {
            config.plugins.plugin_dirs = self.plugin_dirs.clone();
        }
        if let Some(path) = &self.plugin_config_path {
            config.plugins.plugin_config_path = Some(path.clone());
        }
        if self.unsafe_local_dev_kubeconfig {
            config.unsafe_local_dev_kubeconfig = true;
        }
        if let Some(path) = &self.kubeconfig {
            config.kubeconfig = Some(path.clone());
        }
        if let Some(dir) = &self.docs_dir {
            config.docs_dir = dir.clone();
        }
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kubeapps_apis=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Plugin directories configured for a loader that never reads them.
fn ignored_plugin_dirs<'a>(loader: &dyn PluginLoader, config: &'a PluginConfig) -> Option<&'a [PathBuf]> {
    (!loader.searches_plugin_dirs() && !config.plugin_dirs.is_empty()).then_some(&config.plugin_dirs[..])
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.serve_config()?;
    let loader = StaticPluginLoader::default();
    if let Some(dirs) = ignored_plugin_dirs(&loader, &config.plugins) {
        warn!(?dirs, "plugin directories are ignored: this build serves a static plugin set");
    }
    let plugins = loader
        .load(&config.plugins)
        .await
        .context("failed to load plugins")?;
    info!(
        port = config.port,
        plugins = plugins.len(),
        docs_dir = %config.docs_dir.display(),
        "kubeapps-apis configuration loaded"
    );
    serve(config, plugins).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    if let Err(e) = run(cli).await {
        error!("kubeapps-apis stopped: {e:#}");
        std::process::exit(1);
    }
}
