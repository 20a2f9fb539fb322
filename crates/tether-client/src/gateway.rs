//! Filesystem operation gateway.
//!
//! One method per kernel upcall: marshal the POSIX-shaped arguments into a
//! wire request, drive it through the retry policy, and demarshal the
//! response into `Result<T, errno>`. The upcall adapter negates the errno;
//! byte counts and attribute structs pass through as-is.
//!
//! Error mapping: transport exhaustion becomes `EIO`; well-formed failure
//! responses keep their errno; anything malformed becomes `EIO`.

use std::sync::atomic::{AtomicBool, Ordering};

use tether_config::ClientConfig;
use tether_proto::{Attributes, Request, Response};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::retry::RetryPolicy;
use crate::verifier::VerifierTable;

/// Success payload or positive errno.
pub type OpResult<T> = Result<T, i32>;

pub struct Gateway {
    channel: Channel,
    retry: RetryPolicy,
    verifiers: VerifierTable,
    sync_writes: AtomicBool,
}

impl Gateway {
    /// Connect to `host:port` with the given tunables. Write mode starts
    /// buffered unless `sync_writes` is set.
    pub fn new(addr: &str, config: &ClientConfig, sync_writes: bool) -> Self {
        Self {
            channel: Channel::new(addr, config.deadline()),
            retry: RetryPolicy::new(config.attempts, config.backoff_base()),
            verifiers: VerifierTable::new(),
            sync_writes: AtomicBool::new(sync_writes),
        }
    }

    /// Flip between synchronous and buffered write mode (SET_RUN_SYNC).
    pub fn set_sync_writes(&self, sync: bool) {
        self.sync_writes.store(sync, Ordering::SeqCst);
        debug!(sync, "write mode switched");
    }

    pub fn sync_writes(&self) -> bool {
        self.sync_writes.load(Ordering::SeqCst)
    }

    pub fn getattr(&self, path: &str) -> OpResult<Attributes> {
        match self.call(Request::Getattr {
            path: path.to_string(),
        })? {
            Response::Attr(attr) => Ok(attr),
            other => Err(Self::unexpected(path, "getattr", other)),
        }
    }

    pub fn readdir(&self, path: &str) -> OpResult<Vec<String>> {
        match self.call(Request::Readdir {
            path: path.to_string(),
        })? {
            Response::Entries { files } => Ok(files),
            other => Err(Self::unexpected(path, "readdir", other)),
        }
    }

    pub fn open(&self, path: &str, flags: i32) -> OpResult<()> {
        self.expect_done(
            path,
            "open",
            Request::Open {
                path: path.to_string(),
                flags,
            },
        )
    }

    /// Positioned read. A window at or past end of file is a successful
    /// zero-byte read; a payload larger than the caller's buffer is `EFBIG`.
    pub fn read(&self, path: &str, offset: u64, size: u32, flags: i32) -> OpResult<Vec<u8>> {
        match self.call(Request::Read {
            path: path.to_string(),
            offset,
            size,
            flags,
        })? {
            Response::Data { data } => {
                if data.len() > size as usize {
                    warn!(path, got = data.len(), want = size, "read overflow");
                    Err(libc::EFBIG)
                } else {
                    Ok(data)
                }
            }
            Response::Error(e) if e.errno == 0 => Ok(Vec::new()),
            Response::Error(e) => Err(Self::remote_errno(e.errno)),
            other => Err(Self::unexpected(path, "read", other)),
        }
    }

    /// Write through the current mode. Buffered writes record the returned
    /// verifier for the path's open epoch; synchronous writes bypass the
    /// write-log entirely.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> OpResult<u32> {
        let request = if self.sync_writes() {
            Request::WriteSync {
                path: path.to_string(),
                offset,
                data: data.to_vec(),
            }
        } else {
            Request::Write {
                path: path.to_string(),
                offset,
                data: data.to_vec(),
            }
        };

        match self.call(request)? {
            Response::Written {
                bytes_written,
                write_verifier,
            } => {
                if !self.sync_writes() {
                    self.verifiers.record(path, &write_verifier);
                }
                Ok(bytes_written)
            }
            Response::Error(e) => Err(Self::remote_errno(e.errno)),
            other => Err(Self::unexpected(path, "write", other)),
        }
    }

    /// Close an open epoch: COMMIT when buffered writes were observed,
    /// plain RELEASE otherwise. The epoch's verifier set is discarded either
    /// way; a verifier mismatch surfaces as the commit's errno and the lost
    /// writes are never re-driven.
    pub fn release(&self, path: &str, flags: i32) -> OpResult<()> {
        if !self.verifiers.has_pending(path) {
            return self.expect_done(
                path,
                "release",
                Request::Release {
                    path: path.to_string(),
                },
            );
        }

        let write_verifiers = self.verifiers.snapshot(path);
        let result = self.call(Request::Commit {
            path: path.to_string(),
            flags,
            write_verifiers,
        });
        self.verifiers.forget(path);

        match result? {
            Response::Committed {
                current_write_verifier,
            } => {
                debug!(path, verifier = %current_write_verifier, "commit flushed");
                Ok(())
            }
            Response::Error(e) => {
                warn!(path, errno = e.errno, message = %e.message, "commit rejected");
                Err(Self::remote_errno(e.errno))
            }
            other => Err(Self::unexpected(path, "commit", other)),
        }
    }

    pub fn create(&self, path: &str, mode: u32) -> OpResult<()> {
        let mode = if mode == 0 { 0o666 } else { mode };
        self.expect_done(
            path,
            "create",
            Request::Create {
                path: path.to_string(),
                mode,
            },
        )
    }

    pub fn unlink(&self, path: &str) -> OpResult<()> {
        self.expect_done(
            path,
            "unlink",
            Request::Unlink {
                path: path.to_string(),
            },
        )
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> OpResult<()> {
        self.expect_done(
            path,
            "mkdir",
            Request::Mkdir {
                path: path.to_string(),
                mode,
            },
        )
    }

    pub fn rmdir(&self, path: &str) -> OpResult<()> {
        self.expect_done(
            path,
            "rmdir",
            Request::Rmdir {
                path: path.to_string(),
            },
        )
    }

    pub fn utimens(&self, path: &str, atime: i64, mtime: i64) -> OpResult<()> {
        self.expect_done(
            path,
            "utimens",
            Request::Utimens {
                path: path.to_string(),
                atime,
                mtime,
            },
        )
    }

    fn call(&self, request: Request) -> Result<Response, i32> {
        let op = request.op_name();
        self.retry.call(&self.channel, &request).map_err(|err| {
            warn!(op, %err, "RPC failed");
            libc::EIO
        })
    }

    fn expect_done(&self, path: &str, op: &'static str, request: Request) -> OpResult<()> {
        match self.call(request)? {
            Response::Done => Ok(()),
            Response::Error(e) => Err(Self::remote_errno(e.errno)),
            other => Err(Self::unexpected(path, op, other)),
        }
    }

    /// A zero errno on a failure response is only meaningful for READ;
    /// everywhere else it degrades to `EIO`.
    fn remote_errno(errno: i32) -> i32 {
        if errno > 0 {
            errno
        } else {
            libc::EIO
        }
    }

    fn unexpected(path: &str, op: &'static str, response: Response) -> i32 {
        warn!(path, op, ?response, "malformed response");
        libc::EIO
    }
}
