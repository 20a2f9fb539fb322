//! Backing-directory operations.
//!
//! Every operation is stateless with respect to open files: READ, COMMIT and
//! the synchronous write variant open the backing path per call under the
//! caller's flags and close it before responding. Failures carry the errno
//! of the underlying filesystem call.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::Path;

use nix::unistd::AccessFlags;
use tether_proto::{Attributes, RemoteError, Request, Response};
use tracing::{debug, warn};

use crate::state::ServerState;
use crate::writelog::{coalesce, WriteRecord};

/// Dispatch one request against the daemon state.
pub fn handle_request(state: &ServerState, request: Request) -> Response {
    debug!(op = request.op_name(), "dispatch");
    match request {
        Request::Ping => Response::Pong {
            message: "Ack".to_string(),
        },
        Request::Getattr { path } => getattr(state, &path),
        Request::Readdir { path } => readdir(state, &path),
        Request::Open { path, flags } => open(state, &path, flags),
        Request::Read {
            path,
            offset,
            size,
            flags,
        } => read(state, &path, offset, size, flags),
        Request::Write { path, offset, data } => write_buffered(state, &path, offset, data),
        Request::WriteSync { path, offset, data } => write_sync(state, &path, offset, &data),
        Request::Commit {
            path,
            flags,
            write_verifiers,
        } => commit(state, &path, flags, &write_verifiers),
        Request::Release { path } => release(state, &path),
        Request::Create { path, mode } => create(state, &path, mode),
        Request::Unlink { path } => unlink(state, &path),
        Request::Mkdir { path, mode } => mkdir(state, &path, mode),
        Request::Rmdir { path } => rmdir(state, &path),
        Request::Utimens { path, atime, mtime } => utimens(state, &path, atime, mtime),
    }
}

fn getattr(state: &ServerState, path: &str) -> Response {
    match fs::metadata(state.resolve(path)) {
        Ok(meta) => Response::Attr(Attributes {
            mode: meta.mode(),
            nlink: meta.nlink() as u32,
            size: meta.size() as i64,
        }),
        Err(err) => Response::err(errno_of(&err), "File not found"),
    }
}

fn readdir(state: &ServerState, path: &str) -> Response {
    let dir = match fs::read_dir(state.resolve(path)) {
        Ok(dir) => dir,
        Err(err) => return Response::err(errno_of(&err), "Directory not found"),
    };

    let mut files = Vec::new();
    for entry in dir.flatten() {
        // regular files and directories only, like the exported namespace
        match entry.file_type() {
            Ok(ft) if ft.is_file() || ft.is_dir() => {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
            _ => {}
        }
    }
    Response::Entries { files }
}

/// Access check only; no server-side resource is allocated.
fn open(state: &ServerState, path: &str, flags: i32) -> Response {
    let mut access = AccessFlags::empty();
    match flags & libc::O_ACCMODE {
        libc::O_RDONLY => access |= AccessFlags::R_OK,
        libc::O_WRONLY => access |= AccessFlags::W_OK,
        libc::O_RDWR => access |= AccessFlags::R_OK | AccessFlags::W_OK,
        _ => {}
    }

    match nix::unistd::access(&state.resolve(path), access) {
        Ok(()) => Response::Done,
        Err(errno) => Response::err(errno as i32, "Permission denied or file not found"),
    }
}

fn read(state: &ServerState, path: &str, offset: u64, size: u32, flags: i32) -> Response {
    let file = match open_with_flags(&state.resolve(path), flags) {
        Ok(file) => file,
        Err(err) => return Response::err(errno_of(&err), "File not found"),
    };

    let file_size = match file.metadata() {
        Ok(meta) => meta.len(),
        Err(err) => return Response::err(errno_of(&err), "File status retrieval failed"),
    };

    if offset >= file_size {
        // not an error in the POSIX sense; the client folds this into a
        // zero-byte read
        return Response::err(0, "Offset is beyond the file size");
    }

    let want = (size as u64).min(file_size - offset) as usize;
    let mut data = vec![0u8; want];
    let mut filled = 0;
    while filled < want {
        match file.read_at(&mut data[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) => return Response::err(errno_of(&err), "File Read Failed"),
        }
    }
    data.truncate(filled);

    Response::Data { data }
}

/// Append to the write-log; durability is deferred to COMMIT. The response
/// carries the process verifier so the client can detect a restart in
/// between.
fn write_buffered(state: &ServerState, path: &str, offset: u64, data: Vec<u8>) -> Response {
    let bytes_written = data.len() as u32;
    state.write_log.append(path, WriteRecord { offset, data });
    debug!(path, offset, bytes_written, "write buffered");

    Response::Written {
        bytes_written,
        write_verifier: state.verifier().to_string(),
    }
}

/// Diagnostic synchronous write: positioned onto the backing file at once.
fn write_sync(state: &ServerState, path: &str, offset: u64, data: &[u8]) -> Response {
    let file = match OpenOptions::new().write(true).open(state.resolve(path)) {
        Ok(file) => file,
        Err(err) => return Response::err(errno_of(&err), "File not found"),
    };

    if let Err(err) = file.write_all_at(data, offset) {
        return Response::err(errno_of(&err), "File write failed");
    }

    Response::Written {
        bytes_written: data.len() as u32,
        write_verifier: state.verifier().to_string(),
    }
}

fn commit(state: &ServerState, path: &str, flags: i32, write_verifiers: &[String]) -> Response {
    let records = state.write_log.snapshot(path);
    debug!(path, pending = records.len(), "commit requested");

    // Verifier check. An empty set means the epoch buffered nothing; any
    // set that is not exactly the current verifier means buffered data may
    // have died with a previous server process.
    if write_verifiers.is_empty() {
        return Response::Committed {
            current_write_verifier: "-1".to_string(),
        };
    }
    if write_verifiers.len() > 1 {
        warn!(path, "multiple write verifiers in one epoch");
        return Response::Error(RemoteError::with_verifier(
            libc::EIO,
            "Multiple write_verifiers detected, assuming a mismatch",
            state.verifier(),
        ));
    }
    if write_verifiers[0] != state.verifier() {
        warn!(path, observed = %write_verifiers[0], current = %state.verifier(), "write verifier mismatch");
        return Response::Error(RemoteError::with_verifier(
            libc::EIO,
            "Invalid write_verifier detected",
            state.verifier(),
        ));
    }

    let file = match open_with_flags(&state.resolve(path), flags) {
        Ok(file) => file,
        Err(err) => return Response::err(errno_of(&err), "File not found"),
    };

    // Flush stops at the first failing interval; the log entry stays
    // buffered so the partial state is observable, not silently dropped.
    for record in coalesce(records) {
        if let Err(err) = file.write_all_at(&record.data, record.offset) {
            warn!(path, offset = record.offset, %err, "commit flush failed");
            return Response::err(errno_of(&err), "File write failed");
        }
    }

    state.write_log.clear(path);
    debug!(path, "commit flushed");

    Response::Committed {
        current_write_verifier: state.verifier().to_string(),
    }
}

/// Close of an epoch with no buffered writes: existence check only.
fn release(state: &ServerState, path: &str) -> Response {
    match fs::metadata(state.resolve(path)) {
        Ok(_) => Response::Done,
        Err(err) => Response::err(errno_of(&err), format!("File not found: {}", path)),
    }
}

fn create(state: &ServerState, path: &str, mode: u32) -> Response {
    match OpenOptions::new()
        .create(true)
        .write(true)
        .mode(mode)
        .open(state.resolve(path))
    {
        // dropped immediately: no handle survives the call
        Ok(_file) => Response::Done,
        Err(err) => Response::err(errno_of(&err), "File creation failed"),
    }
}

fn unlink(state: &ServerState, path: &str) -> Response {
    match fs::remove_file(state.resolve(path)) {
        Ok(()) => Response::Done,
        Err(err) => Response::err(errno_of(&err), "File unlink failed"),
    }
}

fn mkdir(state: &ServerState, path: &str, mode: u32) -> Response {
    use std::os::unix::fs::DirBuilderExt;
    match fs::DirBuilder::new().mode(mode).create(state.resolve(path)) {
        Ok(()) => Response::Done,
        Err(err) => Response::err(errno_of(&err), "Failed to create directory"),
    }
}

fn rmdir(state: &ServerState, path: &str) -> Response {
    match fs::remove_dir(state.resolve(path)) {
        Ok(()) => Response::Done,
        Err(err) => Response::err(errno_of(&err), "Directory removal failed"),
    }
}

fn utimens(state: &ServerState, path: &str, atime: i64, mtime: i64) -> Response {
    use filetime::FileTime;

    match filetime::set_file_times(
        state.resolve(path),
        FileTime::from_unix_time(atime, 0),
        FileTime::from_unix_time(mtime, 0),
    ) {
        Ok(()) => Response::Done,
        Err(err) => Response::err(errno_of(&err), "Failed to update timestamps"),
    }
}

/// Open a backing path under the caller's open flags (access mode plus any
/// extra bits such as O_APPEND), without creating it.
fn open_with_flags(path: &Path, flags: i32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => {
            options.write(true);
        }
        libc::O_RDWR => {
            options.read(true).write(true);
        }
        _ => {
            options.read(true);
        }
    }
    options.custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_TRUNC));
    options.open(path)
}

fn errno_of(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn state_in(dir: &TempDir) -> ServerState {
        ServerState::with_verifier(dir.path(), "1718000000")
    }

    fn seed_file(dir: &TempDir, name: &str, contents: &[u8]) {
        let mut file = fs::File::create(dir.path().join(name)).unwrap();
        file.write_all(contents).unwrap();
    }

    fn read_back(dir: &TempDir, name: &str) -> Vec<u8> {
        fs::read(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_getattr_reports_size_and_links() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"0123456789");
        let state = state_in(&dir);

        match getattr(&state, "/f") {
            Response::Attr(attr) => {
                assert_eq!(attr.size, 10);
                assert_eq!(attr.nlink, 1);
                assert_ne!(attr.mode & libc::S_IFMT, 0);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_getattr_missing_path_is_enoent() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);
        assert_eq!(getattr(&state, "/missing").errno(), Some(libc::ENOENT));
    }

    #[test]
    fn test_readdir_lists_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"x");
        fs::create_dir(dir.path().join("sub")).unwrap();
        let state = state_in(&dir);

        match readdir(&state, "/") {
            Response::Entries { mut files } => {
                files.sort();
                assert_eq!(files, vec!["f".to_string(), "sub".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_open_checks_access() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"x");
        let state = state_in(&dir);

        assert!(matches!(open(&state, "/f", libc::O_RDONLY), Response::Done));
        assert!(matches!(open(&state, "/f", libc::O_RDWR), Response::Done));
        assert_eq!(
            open(&state, "/missing", libc::O_RDONLY).errno(),
            Some(libc::ENOENT)
        );
    }

    #[test]
    fn test_read_window_is_clamped_to_file_size() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"0123456789");
        let state = state_in(&dir);

        match read(&state, "/f", 6, 4096, libc::O_RDONLY) {
            Response::Data { data } => assert_eq!(data, b"6789"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_read_beyond_eof_is_zero_errno_failure() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"0123456789");
        let state = state_in(&dir);

        assert_eq!(read(&state, "/f", 20, 4096, libc::O_RDONLY).errno(), Some(0));
    }

    #[test]
    fn test_buffered_write_returns_verifier_and_defers_data() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"");
        let state = state_in(&dir);

        match write_buffered(&state, "/f", 0, b"AAAA".to_vec()) {
            Response::Written {
                bytes_written,
                write_verifier,
            } => {
                assert_eq!(bytes_written, 4);
                assert_eq!(write_verifier, "1718000000");
            }
            other => panic!("unexpected: {:?}", other),
        }
        // nothing durable yet
        assert_eq!(read_back(&dir, "f"), b"");
        assert_eq!(state.write_log.pending("/f"), 1);
    }

    #[test]
    fn test_commit_flushes_in_offset_order() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"");
        let state = state_in(&dir);

        write_buffered(&state, "/f", 0, b"AAAA".to_vec());
        write_buffered(&state, "/f", 4, b"BBBB".to_vec());

        let verifiers = vec!["1718000000".to_string()];
        match commit(&state, "/f", libc::O_WRONLY, &verifiers) {
            Response::Committed {
                current_write_verifier,
            } => assert_eq!(current_write_verifier, "1718000000"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(read_back(&dir, "f"), b"AAAABBBB");
        assert_eq!(state.write_log.pending("/f"), 0);
    }

    #[test]
    fn test_commit_overlap_later_write_wins() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"");
        let state = state_in(&dir);

        write_buffered(&state, "/f", 0, b"AAAA".to_vec());
        write_buffered(&state, "/f", 2, b"XX".to_vec());

        let verifiers = vec!["1718000000".to_string()];
        assert!(matches!(
            commit(&state, "/f", libc::O_WRONLY, &verifiers),
            Response::Committed { .. }
        ));
        assert_eq!(read_back(&dir, "f"), b"AAXX");
    }

    #[test]
    fn test_commit_preserves_bytes_outside_written_interval() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"0123456789");
        let state = state_in(&dir);

        write_buffered(&state, "/f", 2, b"XX".to_vec());
        let verifiers = vec!["1718000000".to_string()];
        assert!(matches!(
            commit(&state, "/f", libc::O_WRONLY, &verifiers),
            Response::Committed { .. }
        ));
        assert_eq!(read_back(&dir, "f"), b"01XX456789");
    }

    #[test]
    fn test_commit_without_verifiers_is_trivial() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"keep");
        let state = state_in(&dir);

        match commit(&state, "/f", libc::O_WRONLY, &[]) {
            Response::Committed {
                current_write_verifier,
            } => assert_eq!(current_write_verifier, "-1"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(read_back(&dir, "f"), b"keep");
    }

    #[test]
    fn test_commit_rejects_foreign_verifier() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"keep");
        let state = state_in(&dir);

        write_buffered(&state, "/f", 0, b"AAAA".to_vec());
        let stale = vec!["1000000000".to_string()];
        match commit(&state, "/f", libc::O_WRONLY, &stale) {
            Response::Error(e) => {
                assert_eq!(e.errno, libc::EIO);
                assert_eq!(e.verifier.as_deref(), Some("1718000000"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        // no flush, log stays buffered
        assert_eq!(read_back(&dir, "f"), b"keep");
        assert_eq!(state.write_log.pending("/f"), 1);
    }

    #[test]
    fn test_commit_rejects_multiple_verifiers() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"keep");
        let state = state_in(&dir);

        write_buffered(&state, "/f", 0, b"AAAA".to_vec());
        let mixed = vec!["1000000000".to_string(), "1718000000".to_string()];
        match commit(&state, "/f", libc::O_WRONLY, &mixed) {
            Response::Error(e) => {
                assert_eq!(e.errno, libc::EIO);
                assert!(e.message.contains("Multiple write_verifiers"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(read_back(&dir, "f"), b"keep");
    }

    #[test]
    fn test_write_sync_lands_immediately() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"0123456789");
        let state = state_in(&dir);

        assert!(matches!(
            write_sync(&state, "/f", 2, b"XX"),
            Response::Written {
                bytes_written: 2,
                ..
            }
        ));
        assert_eq!(read_back(&dir, "f"), b"01XX456789");
        assert_eq!(state.write_log.pending("/f"), 0);
    }

    #[test]
    fn test_release_is_an_existence_check() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"x");
        let state = state_in(&dir);

        assert!(matches!(release(&state, "/f"), Response::Done));
        assert_eq!(release(&state, "/missing").errno(), Some(libc::ENOENT));
    }

    #[test]
    fn test_create_then_unlink() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);

        assert!(matches!(create(&state, "/new", 0o644), Response::Done));
        assert!(dir.path().join("new").exists());
        assert!(matches!(unlink(&state, "/new"), Response::Done));
        assert!(!dir.path().join("new").exists());
        // repeated unlink surfaces the underlying errno, untried again
        assert_eq!(unlink(&state, "/new").errno(), Some(libc::ENOENT));
    }

    #[test]
    fn test_mkdir_then_rmdir() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);

        assert!(matches!(mkdir(&state, "/sub", 0o755), Response::Done));
        assert!(dir.path().join("sub").is_dir());
        // second mkdir reports EEXIST
        assert_eq!(mkdir(&state, "/sub", 0o755).errno(), Some(libc::EEXIST));
        assert!(matches!(rmdir(&state, "/sub"), Response::Done));
        assert_eq!(rmdir(&state, "/sub").errno(), Some(libc::ENOENT));
    }

    #[test]
    fn test_utimens_sets_mtime() {
        let dir = TempDir::new().unwrap();
        seed_file(&dir, "f", b"x");
        let state = state_in(&dir);

        assert!(matches!(
            utimens(&state, "/f", 1_000_000, 2_000_000),
            Response::Done
        ));
        let meta = fs::metadata(dir.path().join("f")).unwrap();
        assert_eq!(meta.mtime(), 2_000_000);
    }

    #[test]
    fn test_dispatch_ping() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);
        match handle_request(&state, Request::Ping) {
            Response::Pong { message } => assert_eq!(message, "Ack"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
