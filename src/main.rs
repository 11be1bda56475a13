//! feedvote-gate
//!
//! Fronts the feedvote API with the CSRF guard and the rate limiters.
//!
//! ```text
//!   Client ──▶ request id ─▶ trace ─▶ rate limiter ─▶ CSRF guard ─▶ handler
//!                                      (auth / api)    (non-safe only)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use feedvote_gate::config::{load_config, GateConfig};
use feedvote_gate::config::loader::{apply_env_overrides, ENVIRONMENT_VAR};
use feedvote_gate::config::watcher::ConfigWatcher;
use feedvote_gate::lifecycle::{wait_for_signal, Shutdown};
use feedvote_gate::observability::{logging, metrics};
use feedvote_gate::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "feedvote-gate")]
#[command(about = "CSRF and rate-limit gate for the feedvote API")]
struct Args {
    /// Path to a TOML config file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Reload rate-limit policies when the config file changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = GateConfig::default();
            apply_env_overrides(&mut config, std::env::var(ENVIRONMENT_VAR).ok().as_deref());
            config
        }
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability.log_level);
    tracing::info!("feedvote-gate v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        environment = ?config.environment,
        auth_limit = config.rate_limit.auth.max_requests,
        api_limit = config.rate_limit.api.max_requests,
        window_secs = config.rate_limit.api.window_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        _ => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config);
    let mut server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    tokio::select! {
        result = &mut server_task => {
            result??;
            tracing::warn!("Server exited before a shutdown signal");
            return Ok(());
        }
        _ = wait_for_signal() => shutdown.trigger(),
    }

    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
