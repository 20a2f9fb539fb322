//! Operation messages exchanged between the mount client and the daemon.
//!
//! Every filesystem operation is a unary exchange: one `Request`, one
//! `Response`. Failures travel as `Response::Error` carrying a portable
//! errno; the client negates it before handing it back to the kernel.

use serde::{Deserialize, Serialize};

/// File attributes as reported by GETATTR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub mode: u32,
    pub nlink: u32,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Channel health probe; answered unconditionally.
    Ping,
    Getattr {
        path: String,
    },
    Readdir {
        path: String,
    },
    /// Access check only; the server holds no handle across calls.
    Open {
        path: String,
        flags: i32,
    },
    Read {
        path: String,
        offset: u64,
        size: u32,
        flags: i32,
    },
    /// Buffered write: payload lands in the server's write-log and is not
    /// durable until `Commit`.
    Write {
        path: String,
        offset: u64,
        data: Vec<u8>,
    },
    /// Diagnostic synchronous write: positioned onto the backing file
    /// immediately, bypassing the write-log.
    WriteSync {
        path: String,
        offset: u64,
        data: Vec<u8>,
    },
    /// Flush a path's buffered writes after validating the verifier set
    /// observed by the client during the open epoch.
    Commit {
        path: String,
        flags: i32,
        write_verifiers: Vec<String>,
    },
    /// Close without pending writes: existence check only.
    Release {
        path: String,
    },
    Create {
        path: String,
        mode: u32,
    },
    Unlink {
        path: String,
    },
    Mkdir {
        path: String,
        mode: u32,
    },
    Rmdir {
        path: String,
    },
    /// Timestamps in whole seconds since the epoch.
    Utimens {
        path: String,
        atime: i64,
        mtime: i64,
    },
}

impl Request {
    /// Operation name for logging
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Getattr { .. } => "getattr",
            Request::Readdir { .. } => "readdir",
            Request::Open { .. } => "open",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::WriteSync { .. } => "write_sync",
            Request::Commit { .. } => "commit",
            Request::Release { .. } => "release",
            Request::Create { .. } => "create",
            Request::Unlink { .. } => "unlink",
            Request::Mkdir { .. } => "mkdir",
            Request::Rmdir { .. } => "rmdir",
            Request::Utimens { .. } => "utimens",
        }
    }
}

/// Well-formed failure response.
///
/// `errno` is a portable POSIX value. A zero errno is not an error in the
/// POSIX sense; it is used by READ to signal a window that starts at or past
/// end of file, which the client folds into a zero-byte read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub errno: i32,
    pub message: String,
    /// The server's current write verifier, attached to COMMIT rejections so
    /// the mismatch is observable by the caller.
    pub verifier: Option<String>,
}

impl RemoteError {
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
            verifier: None,
        }
    }

    pub fn with_verifier(errno: i32, message: impl Into<String>, verifier: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
            verifier: Some(verifier.into()),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "errno {}: {}", self.errno, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Pong {
        message: String,
    },
    Attr(Attributes),
    Entries {
        files: Vec<String>,
    },
    /// Generic success for operations with no payload
    Done,
    Data {
        data: Vec<u8>,
    },
    Written {
        bytes_written: u32,
        write_verifier: String,
    },
    Committed {
        current_write_verifier: String,
    },
    Error(RemoteError),
}

impl Response {
    pub fn err(errno: i32, message: impl Into<String>) -> Self {
        Response::Error(RemoteError::new(errno, message))
    }

    /// The errno of a failure response, if this is one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Response::Error(e) => Some(e.errno),
            _ => None,
        }
    }
}
