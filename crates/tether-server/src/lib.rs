//! # tether-server
//!
//! The TetherFS storage daemon. Client paths resolve against a local backing
//! directory; buffered writes accumulate in an in-memory write-log and reach
//! disk only on COMMIT, guarded by a process-lifetime write verifier.

pub mod ops;
pub mod state;
pub mod writelog;

pub use state::ServerState;

use std::io;
use std::path::Path;
use std::sync::Arc;

use tether_proto::frame_async;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

/// Ensure the backing directory exists (created `0777` when absent) and
/// actually is a directory.
pub fn prepare_root(root: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} exists but is not a directory", root.display()),
        )),
        Err(_) => std::fs::DirBuilder::new().mode(0o777).create(root),
    }
}

/// Accept loop: one task per connection, all sharing the daemon state.
/// Runs until the listener fails or the caller drops the future.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "connection accepted");
                let state = state.clone();
                tokio::spawn(handle_connection(stream, state));
            }
            Err(err) => {
                error!(%err, "accept error");
            }
        }
    }
}

/// Per-connection request loop: read a framed request, dispatch, answer with
/// the same sequence id. A clean EOF ends the connection silently.
async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    loop {
        let (header, request) = match frame_async::read_request(&mut stream).await {
            Ok(result) => result,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("connection closed");
                return;
            }
            Err(err) => {
                warn!(%err, "failed to read request");
                return;
            }
        };

        let response = ops::handle_request(&state, request);

        if let Err(err) = frame_async::send_response(&mut stream, &response, header.seq_id).await {
            warn!(%err, "failed to send response");
            return;
        }
    }
}
