//! Transport error taxonomy.
//!
//! Only `DeadlineExceeded` and `Unavailable` are retried; everything else is
//! surfaced to the gateway immediately and becomes `EIO` at the upcall layer.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The per-attempt deadline elapsed before a response arrived. The
    /// server's state is unknown: the request may or may not have landed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The channel to the server is gone and must be re-established.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// Any other transport outcome, including malformed frames.
    #[error("transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    /// Whether the retry loop may take another attempt for this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::DeadlineExceeded | TransportError::Unavailable(_)
        )
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }

    /// Categorize an I/O failure from the socket layer.
    pub fn from_io(err: io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            // Read/write timeouts surface as WouldBlock on Linux, TimedOut elsewhere.
            TimedOut | WouldBlock => TransportError::DeadlineExceeded,
            ConnectionRefused | ConnectionReset | ConnectionAborted | BrokenPipe
            | UnexpectedEof | NotConnected => TransportError::Unavailable(err.to_string()),
            _ => TransportError::Fatal(err.to_string()),
        }
    }
}
