//! Logging setup shared by the TetherFS binaries.

use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter (e.g. `debug`,
/// `tether_server=trace`).
pub const LOG_ENV: &str = "TETHERFS_LOG";

/// Initialize tracing with the `TETHERFS_LOG` filter, defaulting to `info`.
/// Call this once at binary startup.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
