/*
socialscope - server binary
This binary loads the configuration, checks credentials, and starts the Rocket HTTP server.
*/

use anyhow::Result;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use socialscope::pipeline::Pipeline;
use socialscope::server::{launch_rocket, AppState};

#[derive(Parser, Debug)]
#[command(name = "socialscope", about = "SocialScope news-to-social-post server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the bind address from the config file
    #[arg(long)]
    bind: Option<String>,

    /// Override the port from the config file
    #[arg(long)]
    port: Option<u16>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Credentials may live in a local .env file
    if let Ok(path) = dotenv::dotenv() {
        info!(path = ?path, "loaded environment from .env");
    }

    let mut config = load_config(args.config).await?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Fail fast on missing credentials rather than on the first request
    let pipeline = match Pipeline::from_config(&config) {
        Ok(p) => p,
        Err(e) => {
            error!("failed to initialize pipeline: {:#}", e);
            return Err(e);
        }
    };

    let state = AppState::new(Arc::new(pipeline));
    launch_rocket(state, &config.server).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolve config paths: `config.default.toml` as a base, then `--config` or `./config.toml` on top.
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(default_path.as_path()) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    info!(default = ?default_path, override_file = ?override_path, "configuration loaded");
    Ok(config)
}
