use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use tether_client::Gateway;
use tether_fuse::TetherFs;

#[derive(Parser)]
#[command(name = "tetherfs")]
#[command(version, about = "TetherFS mount client", long_about = None)]
struct Cli {
    /// Server address (host:port)
    server: String,

    /// Local mount point
    mountpoint: PathBuf,

    /// Start in synchronous write mode (bypass the server write-log)
    #[arg(long)]
    sync: bool,
}

fn main() -> Result<()> {
    tether_config::logging::init();

    let cli = Cli::parse();
    let config = tether_config::Config::load().unwrap_or_else(|err| {
        warn!("Config load failed: {}. Using defaults.", err);
        tether_config::Config::default()
    });

    let gateway = Arc::new(Gateway::new(&cli.server, &config.client, cli.sync));
    info!(
        server = %cli.server,
        mountpoint = %cli.mountpoint.display(),
        sync = cli.sync,
        "mounting"
    );

    TetherFs::new(gateway).mount(&cli.mountpoint)
}
