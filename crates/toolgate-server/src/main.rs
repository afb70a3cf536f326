//! toolgate - OpenAI-compatible gateway with sandboxed tool execution

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use toolgate_core::GatewayConfig;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(
    about = "OpenAI-compatible gateway that executes model tool calls in a sandbox",
    long_about = None
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "TOOLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory tools operate in (default: current directory)
    #[arg(short, long)]
    working_dir: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            GatewayConfig::load(Path::new(DEFAULT_CONFIG_FILE))
                .context("failed to load ./config.yaml")
        }
        None => {
            let mut config = GatewayConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

fn init_tracing(config: &GatewayConfig) {
    // RUST_LOG wins; logging.level is the fallback.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_tracing(&config);

    let working_dir = match cli.working_dir {
        Some(dir) => dir
            .canonicalize()
            .with_context(|| format!("working directory {} does not exist", dir.display()))?,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.model.endpoint,
        "Starting toolgate"
    );

    toolgate_server::start_server(config, working_dir).await
}
