//! One logical channel to the daemon.
//!
//! The channel owns a lazily-connected TCP stream guarded by a mutex, so
//! concurrent upcall threads serialize their unary exchanges on it and
//! concurrent reconnect attempts converge on a single live connection. The
//! per-attempt deadline is enforced through socket read/write timeouts.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use tether_proto::{frame_sync, Request, Response};
use tracing::{debug, info, warn};

use crate::error::TransportError;

struct ChannelState {
    stream: Option<TcpStream>,
}

pub struct Channel {
    addr: String,
    deadline: Duration,
    state: Mutex<ChannelState>,
}

impl Channel {
    /// Create a channel to `host:port` and probe it with a Ping exchange.
    /// A failed probe is logged and tolerated; the first operation will
    /// retry the connection.
    pub fn new(addr: impl Into<String>, deadline: Duration) -> Self {
        let channel = Self {
            addr: addr.into(),
            deadline,
            state: Mutex::new(ChannelState { stream: None }),
        };

        match channel.call(&Request::Ping) {
            Ok(Response::Pong { message }) => {
                info!(addr = %channel.addr, %message, "server ping ok")
            }
            Ok(other) => warn!(addr = %channel.addr, ?other, "unexpected ping response"),
            Err(err) => warn!(addr = %channel.addr, %err, "server ping failed"),
        }

        channel
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Perform one unary exchange under the current deadline.
    ///
    /// On an unavailable outcome the dead stream is discarded and a fresh
    /// connection to the same endpoint is attempted before returning, so the
    /// next caller finds a live channel when the server is back.
    pub fn call(&self, request: &Request) -> Result<Response, TransportError> {
        let mut state = self.state.lock().unwrap();

        if state.stream.is_none() {
            state.stream = Some(self.open_stream()?);
        }
        let stream = state.stream.as_mut().unwrap();

        match Self::exchange(stream, request) {
            Ok(response) => Ok(response),
            Err(err) => {
                let err = TransportError::from_io(err);
                // A failed exchange leaves the byte stream misaligned (a late
                // response may still arrive), so the connection is never reused.
                state.stream = None;
                if err.is_unavailable() {
                    debug!(addr = %self.addr, "channel lost, re-establishing");
                    if let Ok(fresh) = self.open_stream() {
                        state.stream = Some(fresh);
                    }
                }
                Err(err)
            }
        }
    }

    /// Ensure a live connection exists, re-dialing if necessary. Called by
    /// the retry policy between attempts; concurrent callers serialize on
    /// the state mutex, so only one dial happens per teardown.
    pub fn reconnect(&self) {
        let mut state = self.state.lock().unwrap();
        if state.stream.is_some() {
            return;
        }
        match self.open_stream() {
            Ok(stream) => state.stream = Some(stream),
            Err(err) => warn!(addr = %self.addr, %err, "reconnect failed"),
        }
    }

    fn exchange(stream: &mut TcpStream, request: &Request) -> std::io::Result<Response> {
        let seq_id = frame_sync::send_request(stream, request)?;
        let (header, response) = frame_sync::read_response(stream)?;
        if header.seq_id != seq_id {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "response seq mismatch: expected {}, got {}",
                    seq_id, header.seq_id
                ),
            ));
        }
        Ok(response)
    }

    fn open_stream(&self) -> Result<TcpStream, TransportError> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.deadline)
            .map_err(TransportError::from_io)?;
        stream
            .set_read_timeout(Some(self.deadline))
            .map_err(TransportError::from_io)?;
        stream
            .set_write_timeout(Some(self.deadline))
            .map_err(TransportError::from_io)?;
        let _ = stream.set_nodelay(true);
        debug!(addr = %self.addr, "channel established");
        Ok(stream)
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        self.addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?
            .next()
            .ok_or_else(|| {
                TransportError::Unavailable(format!("no address for {}", self.addr))
            })
    }
}
