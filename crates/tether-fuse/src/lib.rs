//! # tether-fuse
//!
//! Kernel upcall adapter for TetherFS.
//!
//! Maps FUSE callbacks onto the operation gateway: inodes are interned per
//! remote path, every callback forwards its POSIX-shaped arguments and
//! replies with the gateway's errno or payload. No attributes are cached
//! (TTL zero); truncate is accepted and reported as success.

/// ioctl command understood by the mounted filesystem: a nonzero `u32`
/// argument selects synchronous writes, zero returns to buffered writes.
pub const SET_RUN_SYNC: u32 = 0x5453_0001;

/// Remote path of `name` under `parent` ("/" joins without doubling).
fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Remote path of the directory containing `path` ("/" is its own parent).
fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod imp {
    use std::collections::HashMap;
    use std::ffi::OsStr;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use fuser::{
        FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
        ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
    };
    use libc::{c_int, EINVAL, ENOENT, ENOSYS, ENOTTY};
    use tether_client::Gateway;
    use tether_proto::Attributes;
    use tracing::debug;

    use super::{child_path, parent_path, SET_RUN_SYNC};

    // attributes are never cached; entries expire at once
    const TTL: Duration = Duration::ZERO;
    const BLOCK_SIZE: u32 = 4096;

    pub struct TetherFs {
        gateway: Arc<Gateway>,
        inodes: HashMap<u64, String>,
        path_to_inode: HashMap<String, u64>,
        next_inode: u64,
    }

    impl TetherFs {
        pub fn new(gateway: Arc<Gateway>) -> Self {
            let mut fs = Self {
                gateway,
                inodes: HashMap::new(),
                path_to_inode: HashMap::new(),
                next_inode: 2, // 1 is root
            };
            fs.inodes.insert(1, "/".to_string());
            fs.path_to_inode.insert("/".to_string(), 1);
            fs
        }

        /// Mount and serve until unmounted (Ref: <https://docs.rs/fuser>)
        pub fn mount(self, mountpoint: &Path) -> anyhow::Result<()> {
            let opts = vec![fuser::MountOption::FSName("tetherfs".to_string())];
            fuser::mount2(self, mountpoint, &opts)?;
            Ok(())
        }

        fn intern(&mut self, path: String) -> u64 {
            if let Some(&ino) = self.path_to_inode.get(&path) {
                return ino;
            }
            let ino = self.next_inode;
            self.next_inode += 1;
            self.path_to_inode.insert(path.clone(), ino);
            self.inodes.insert(ino, path);
            ino
        }

        fn path_of(&self, ino: u64) -> Option<String> {
            self.inodes.get(&ino).cloned()
        }

        fn file_attr(ino: u64, attr: &Attributes) -> FileAttr {
            let kind = if attr.mode & libc::S_IFMT == libc::S_IFDIR {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            FileAttr {
                ino,
                size: attr.size.max(0) as u64,
                blocks: (attr.size.max(0) as u64).div_ceil(BLOCK_SIZE as u64),
                atime: UNIX_EPOCH,
                mtime: UNIX_EPOCH,
                ctime: UNIX_EPOCH,
                crtime: UNIX_EPOCH,
                kind,
                perm: (attr.mode & 0o7777) as u16,
                nlink: attr.nlink,
                uid: 0,
                gid: 0,
                rdev: 0,
                flags: 0,
                blksize: BLOCK_SIZE,
            }
        }

        fn stat(&mut self, path: &str) -> Result<FileAttr, c_int> {
            let attr = self.gateway.getattr(path)?;
            let ino = self.intern(path.to_string());
            Ok(Self::file_attr(ino, &attr))
        }
    }

    impl Filesystem for TetherFs {
        fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
            let (parent_path, name) = match (self.path_of(parent), name.to_str()) {
                (Some(p), Some(n)) => (p, n),
                _ => {
                    reply.error(ENOENT);
                    return;
                }
            };

            match self.stat(&child_path(&parent_path, name)) {
                Ok(attr) => reply.entry(&TTL, &attr, 0),
                Err(errno) => reply.error(errno),
            }
        }

        fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
            let path = match self.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(ENOENT);
                    return;
                }
            };
            match self.stat(&path) {
                Ok(attr) => reply.attr(&TTL, &attr),
                Err(errno) => reply.error(errno),
            }
        }

        #[allow(clippy::too_many_arguments)]
        fn setattr(
            &mut self,
            _req: &Request,
            ino: u64,
            _mode: Option<u32>,
            _uid: Option<u32>,
            _gid: Option<u32>,
            size: Option<u64>,
            atime: Option<TimeOrNow>,
            mtime: Option<TimeOrNow>,
            _ctime: Option<SystemTime>,
            _fh: Option<u64>,
            _crtime: Option<SystemTime>,
            _chgtime: Option<SystemTime>,
            _bkuptime: Option<SystemTime>,
            _flags: Option<u32>,
            reply: ReplyAttr,
        ) {
            let path = match self.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(ENOENT);
                    return;
                }
            };

            if size.is_some() {
                // truncate is accepted and reported as success
                debug!(%path, "truncate accepted as no-op");
            }

            if atime.is_some() || mtime.is_some() {
                let atime = to_unix_secs(atime);
                let mtime = to_unix_secs(mtime);
                if let Err(errno) = self.gateway.utimens(&path, atime, mtime) {
                    reply.error(errno);
                    return;
                }
            }

            match self.stat(&path) {
                Ok(attr) => reply.attr(&TTL, &attr),
                Err(errno) => reply.error(errno),
            }
        }

        fn mknod(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            _umask: u32,
            _rdev: u32,
            reply: ReplyEntry,
        ) {
            if mode & libc::S_IFMT != libc::S_IFREG {
                reply.error(ENOSYS);
                return;
            }
            let (parent_path, name) = match (self.path_of(parent), name.to_str()) {
                (Some(p), Some(n)) => (p, n),
                _ => {
                    reply.error(ENOENT);
                    return;
                }
            };

            let path = child_path(&parent_path, name);
            if let Err(errno) = self.gateway.create(&path, mode & 0o7777) {
                reply.error(errno);
                return;
            }
            match self.stat(&path) {
                Ok(attr) => reply.entry(&TTL, &attr, 0),
                Err(errno) => reply.error(errno),
            }
        }

        fn mkdir(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            _umask: u32,
            reply: ReplyEntry,
        ) {
            let (parent_path, name) = match (self.path_of(parent), name.to_str()) {
                (Some(p), Some(n)) => (p, n),
                _ => {
                    reply.error(ENOENT);
                    return;
                }
            };

            let path = child_path(&parent_path, name);
            if let Err(errno) = self.gateway.mkdir(&path, mode & 0o7777) {
                reply.error(errno);
                return;
            }
            match self.stat(&path) {
                Ok(attr) => reply.entry(&TTL, &attr, 0),
                Err(errno) => reply.error(errno),
            }
        }

        fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            let (parent_path, name) = match (self.path_of(parent), name.to_str()) {
                (Some(p), Some(n)) => (p, n),
                _ => {
                    reply.error(ENOENT);
                    return;
                }
            };
            match self.gateway.unlink(&child_path(&parent_path, name)) {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        }

        fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
            let (parent_path, name) = match (self.path_of(parent), name.to_str()) {
                (Some(p), Some(n)) => (p, n),
                _ => {
                    reply.error(ENOENT);
                    return;
                }
            };
            match self.gateway.rmdir(&child_path(&parent_path, name)) {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        }

        fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
            let path = match self.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(ENOENT);
                    return;
                }
            };
            match self.gateway.open(&path, flags) {
                // no server handle exists; fh 0 stands in for "stateless"
                Ok(()) => reply.opened(0, 0),
                Err(errno) => reply.error(errno),
            }
        }

        #[allow(clippy::too_many_arguments)]
        fn read(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            size: u32,
            flags: c_int,
            _lock_owner: Option<u64>,
            reply: ReplyData,
        ) {
            let path = match self.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(ENOENT);
                    return;
                }
            };
            match self.gateway.read(&path, offset.max(0) as u64, size, flags) {
                Ok(data) => reply.data(&data),
                Err(errno) => reply.error(errno),
            }
        }

        #[allow(clippy::too_many_arguments)]
        fn write(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            data: &[u8],
            _write_flags: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyWrite,
        ) {
            let path = match self.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(ENOENT);
                    return;
                }
            };
            match self.gateway.write(&path, offset.max(0) as u64, data) {
                Ok(written) => reply.written(written),
                Err(errno) => reply.error(errno),
            }
        }

        fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
            // durability is settled at release time via COMMIT
            reply.ok();
        }

        fn release(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            flags: i32,
            _lock_owner: Option<u64>,
            _flush: bool,
            reply: ReplyEmpty,
        ) {
            let path = match self.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(ENOENT);
                    return;
                }
            };
            match self.gateway.release(&path, flags) {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        }

        fn readdir(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            mut reply: ReplyDirectory,
        ) {
            let path = match self.path_of(ino) {
                Some(p) => p,
                None => {
                    reply.error(ENOENT);
                    return;
                }
            };

            let entries = match self.gateway.readdir(&path) {
                Ok(entries) => entries,
                Err(errno) => {
                    reply.error(errno);
                    return;
                }
            };

            if offset == 0 {
                if reply.add(ino, 1, FileType::Directory, ".") {
                    reply.ok();
                    return;
                }
                let parent_ino = self
                    .path_to_inode
                    .get(parent_path(&path))
                    .copied()
                    .unwrap_or(1);
                if reply.add(parent_ino, 2, FileType::Directory, "..") {
                    reply.ok();
                    return;
                }
            }

            let skip = if offset > 2 { (offset - 2) as usize } else { 0 };
            for (i, name) in entries.iter().enumerate().skip(skip) {
                let entry_path = child_path(&path, name);
                let kind = match self.gateway.getattr(&entry_path) {
                    Ok(attr) if attr.mode & libc::S_IFMT == libc::S_IFDIR => FileType::Directory,
                    _ => FileType::RegularFile,
                };
                let entry_ino = self.intern(entry_path);
                // offset for the next entry: 1-based index plus the dot entries
                if reply.add(entry_ino, (i + 3) as i64, kind, name) {
                    break;
                }
            }
            reply.ok();
        }

        fn create(
            &mut self,
            _req: &Request,
            parent: u64,
            name: &OsStr,
            mode: u32,
            _umask: u32,
            _flags: i32,
            reply: ReplyCreate,
        ) {
            let (parent_path, name) = match (self.path_of(parent), name.to_str()) {
                (Some(p), Some(n)) => (p, n),
                _ => {
                    reply.error(ENOENT);
                    return;
                }
            };

            let path = child_path(&parent_path, name);
            if let Err(errno) = self.gateway.create(&path, mode & 0o7777) {
                reply.error(errno);
                return;
            }
            match self.stat(&path) {
                Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
                Err(errno) => reply.error(errno),
            }
        }

        #[allow(clippy::too_many_arguments)]
        fn ioctl(
            &mut self,
            _req: &Request,
            _ino: u64,
            _fh: u64,
            _flags: u32,
            cmd: u32,
            in_data: &[u8],
            _out_size: u32,
            reply: fuser::ReplyIoctl,
        ) {
            if cmd != SET_RUN_SYNC {
                reply.error(ENOTTY);
                return;
            }
            let arg = match in_data.get(0..4) {
                Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                None => {
                    reply.error(EINVAL);
                    return;
                }
            };
            self.gateway.set_sync_writes(arg != 0);
            reply.ioctl(0, &[]);
        }
    }

    fn to_unix_secs(time: Option<TimeOrNow>) -> i64 {
        let time = match time {
            Some(TimeOrNow::SpecificTime(t)) => t,
            Some(TimeOrNow::Now) | None => SystemTime::now(),
        };
        time.duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
mod imp {
    use std::path::Path;
    use std::sync::Arc;

    use tether_client::Gateway;

    /// Stub filesystem for non-Linux or non-feature builds
    pub struct TetherFs;

    impl TetherFs {
        pub fn new(_gateway: Arc<Gateway>) -> Self {
            Self
        }

        pub fn mount(self, _mountpoint: &Path) -> anyhow::Result<()> {
            anyhow::bail!("FUSE mounting requires Linux and the `fuse` feature")
        }
    }
}

pub use imp::TetherFs;
