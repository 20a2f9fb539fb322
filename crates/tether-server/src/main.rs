use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use tether_server::{prepare_root, serve, ServerState};

#[derive(Parser)]
#[command(name = "tetherd")]
#[command(version, about = "TetherFS storage daemon", long_about = None)]
struct Cli {
    /// Backing directory that materializes the exported namespace
    root: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tether_config::logging::init();

    let cli = Cli::parse();
    let config = tether_config::Config::load().unwrap_or_else(|err| {
        warn!("Config load failed: {}. Using defaults.", err);
        tether_config::Config::default()
    });

    let root = cli.root.unwrap_or(config.server.root);
    prepare_root(&root)
        .with_context(|| format!("backing directory {} unusable", root.display()))?;

    let state = Arc::new(ServerState::new(root.clone()));
    info!(
        root = %root.display(),
        verifier = %state.verifier(),
        "write verifier initialized"
    );

    let listen = cli.listen.unwrap_or(config.server.listen);
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    info!(%listen, "tetherd listening");

    tokio::select! {
        result = serve(listener, state) => result?,
        _ = signal::ctrl_c() => info!("shutdown signal received"),
    }

    Ok(())
}
