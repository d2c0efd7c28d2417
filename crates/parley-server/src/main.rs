//! parley-server: realtime chat server.
//!
//! Verifies credentials over HTTP, hands out one-time tickets, and upgrades
//! ticket holders to WebSocket chat sessions.

use anyhow::Context;
use clap::Parser;
use parley_server::{Overrides, ParleyServer, ServerConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;

/// parley-server: realtime chat server
#[derive(Parser, Debug)]
#[command(name = "parley-server", version, about = "Realtime chat server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Config file path
    #[arg(long, default_value = "~/.parley/server.toml")]
    config: String,

    /// Persist registered users to this JSON file
    #[arg(long)]
    users_file: Option<String>,

    /// Refuse guest logins
    #[arg(long)]
    no_guests: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting parley-server");

    let overrides = Overrides {
        bind: cli.bind,
        port: cli.port,
        users_file: cli.users_file,
        no_guests: cli.no_guests,
    };
    let config_path = PathBuf::from(&cli.config);
    let config = ServerConfig::load(Some(&config_path), overrides).context("failed to load config")?;

    let server = ParleyServer::new(config).await.context("failed to create server")?;
    let listener = server.bind().await.context("failed to bind listener")?;

    server
        .serve(listener, shutdown_signal())
        .await
        .context("server error")?;

    info!("parley-server stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }

    info!("received shutdown signal");
}
