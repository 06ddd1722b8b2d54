//! FUSE filesystem driver: serves a [`PathResolver`] namespace read-only.
//!
//! Every kernel request is a path plus an operation. The driver turns it
//! into a [`Query`], runs the resolver on the blocking pool (catalog fetches
//! and media reads may hit the network), and converts the answer into fuse3
//! replies. Open files keep their [`FileContent`] in a handle table so reads
//! do not resolve the path again.

#[cfg(feature = "fuse")]
mod inner {
    use std::collections::HashMap;
    use std::ffi::OsStr;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;
    use cdfs_core::{DirEntry, EntryKind, FsError, Stat};
    use fuse3::path::prelude::*;
    use fuse3::{Errno, FileType, MountOptions};
    use futures_util::stream;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    use crate::content::FileContent;
    use crate::media::UrlFetcher;
    use crate::query::Query;
    use crate::resolver::PathResolver;

    const PERM_FILE: u16 = 0o444; // r--r--r--
    const PERM_DIR: u16 = 0o555; // r-xr-xr-x
    const PERM_LINK: u16 = 0o777;

    const MAX_WRITE: u32 = 128 * 1024;

    // ── CdfsFs ────────────────────────────────────────────────────────────────

    pub struct CdfsFs {
        resolver: Arc<PathResolver>,
        fetcher: Arc<dyn UrlFetcher>,
        uid: u32,
        gid: u32,
        attr_ttl: Duration,
        /// Open file handles: fh → content resolved at open time
        handles: Arc<Mutex<HashMap<u64, FileContent>>>,
        next_fh: Arc<AtomicU64>,
        /// Mount timestamp (used as atime/mtime for all entries)
        mount_time: SystemTime,
    }

    impl CdfsFs {
        pub fn new(resolver: Arc<PathResolver>, fetcher: Arc<dyn UrlFetcher>, attr_ttl: Duration) -> Self {
            let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
            CdfsFs {
                resolver,
                fetcher,
                uid,
                gid,
                attr_ttl,
                handles: Arc::new(Mutex::new(HashMap::new())),
                next_fh: Arc::new(AtomicU64::new(1)),
                mount_time: SystemTime::now(),
            }
        }

        fn attr(&self, stat: &Stat) -> FileAttr {
            let (kind, perm) = match stat.kind {
                EntryKind::Directory => (FileType::Directory, PERM_DIR),
                EntryKind::File => (FileType::RegularFile, PERM_FILE),
                EntryKind::Symlink => (FileType::Symlink, PERM_LINK),
            };
            FileAttr {
                size: stat.size,
                blocks: stat.size.div_ceil(512),
                atime: self.mount_time,
                mtime: self.mount_time,
                ctime: self.mount_time,
                #[cfg(target_os = "macos")]
                crtime: self.mount_time,
                kind,
                perm,
                nlink: stat.nlink,
                uid: self.uid,
                gid: self.gid,
                rdev: 0,
                blksize: 4096,
                #[cfg(target_os = "macos")]
                flags: 0,
            }
        }

        /// Run a resolver call on the blocking pool.
        async fn blocking<T, F>(&self, f: F) -> fuse3::Result<T>
        where
            T: Send + 'static,
            F: FnOnce(&PathResolver) -> Result<T, FsError> + Send + 'static,
        {
            let resolver = Arc::clone(&self.resolver);
            match tokio::task::spawn_blocking(move || f(&resolver)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => {
                    if let FsError::BrowseFailed { .. } = err {
                        warn!("{err}");
                    }
                    Err(Errno::from(err.errno()))
                }
                Err(join) => {
                    warn!("resolver task failed: {join}");
                    Err(Errno::from(libc::EIO))
                }
            }
        }

        async fn stat(&self, path: String) -> fuse3::Result<Stat> {
            self.blocking(move |resolver| {
                let mut query = Query::new().with_stat();
                resolver.resolve(&path, &mut query)?;
                query.stat().cloned().ok_or(FsError::NotFound {
                    path,
                    matched: String::new(),
                    cause: None,
                })
            })
            .await
        }

        /// List a directory; with `stats`, each entry is stat'ed as well.
        async fn list(&self, path: String, stats: bool) -> fuse3::Result<Vec<(DirEntry, Option<Stat>)>> {
            self.blocking(move |resolver| {
                let mut entries: Vec<DirEntry> = Vec::new();
                let own = {
                    let mut query = Query::new().with_stat().with_listing(&mut entries);
                    resolver.resolve(&path, &mut query)?;
                    query.stat().cloned()
                };
                Ok(entries
                    .into_iter()
                    .map(|entry| {
                        let stat = match (stats, entry.name.as_str()) {
                            (false, _) => None,
                            (true, "." | "..") => own.clone(),
                            (true, name) => {
                                let mut query = Query::new().with_stat();
                                resolver
                                    .resolve(&join(&path, name), &mut query)
                                    .ok()
                                    .and_then(|_| query.stat().cloned())
                            }
                        };
                        (entry, stat)
                    })
                    .collect())
            })
            .await
        }
    }

    fn path_str(path: &OsStr) -> fuse3::Result<&str> {
        path.to_str().ok_or(Errno::from(libc::ENOENT))
    }

    fn join(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{}/{}", parent.trim_end_matches('/'), name)
        }
    }

    fn file_type(kind: EntryKind) -> FileType {
        match kind {
            EntryKind::Directory => FileType::Directory,
            EntryKind::File => FileType::RegularFile,
            EntryKind::Symlink => FileType::Symlink,
        }
    }

    fn wants_write(flags: u32) -> bool {
        let flags = flags as i32;
        flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_TRUNC != 0
    }

    // ── PathFilesystem impl ────────────────────────────────────────────────────

    impl PathFilesystem for CdfsFs {
        async fn init(&self, _req: Request) -> fuse3::Result<ReplyInit> {
            debug!("cdfs init");
            Ok(ReplyInit {
                max_write: NonZeroU32::new(MAX_WRITE).unwrap_or(NonZeroU32::MIN),
            })
        }

        async fn destroy(&self, _req: Request) {
            info!("cdfs unmounted");
        }

        async fn getattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            _fh: Option<u64>,
            _flags: u32,
        ) -> fuse3::Result<ReplyAttr> {
            let path = path.map(path_str).transpose()?.unwrap_or("/").to_string();
            let stat = self.stat(path).await?;
            Ok(ReplyAttr {
                ttl: self.attr_ttl,
                attr: self.attr(&stat),
            })
        }

        async fn lookup(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<ReplyEntry> {
            let path = join(path_str(parent)?, path_str(name)?);
            let stat = self.stat(path).await?;
            Ok(ReplyEntry {
                ttl: self.attr_ttl,
                attr: self.attr(&stat),
            })
        }

        type DirEntryStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
        where
            Self: 'a;

        type DirEntryPlusStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
        where
            Self: 'a;

        async fn readdir<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: i64,
        ) -> fuse3::Result<ReplyDirectory<Self::DirEntryStream<'a>>> {
            let listed = self.list(path_str(path)?.to_string(), false).await?;
            let entries: Vec<fuse3::Result<DirectoryEntry>> = listed
                .into_iter()
                .zip(1i64..)
                .skip_while(|(_, next)| *next <= offset)
                .map(|((entry, _), next)| {
                    Ok(DirectoryEntry {
                        kind: file_type(entry.kind),
                        name: entry.name.into(),
                        offset: next,
                    })
                })
                .collect();
            Ok(ReplyDirectory {
                entries: stream::iter(entries),
            })
        }

        async fn readdirplus<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
            let listed = self.list(path_str(path)?.to_string(), true).await?;
            let entries: Vec<fuse3::Result<DirectoryEntryPlus>> = listed
                .into_iter()
                .zip(1u64..)
                .skip_while(|(_, next)| *next <= offset)
                // An entry that vanished between listing and stat is skipped
                .filter_map(|((entry, stat), next)| {
                    let stat = stat?;
                    Some(Ok(DirectoryEntryPlus {
                        kind: file_type(entry.kind),
                        name: entry.name.into(),
                        offset: next as i64,
                        attr: self.attr(&stat),
                        entry_ttl: self.attr_ttl,
                        attr_ttl: self.attr_ttl,
                    }))
                })
                .collect();
            Ok(ReplyDirectoryPlus {
                entries: stream::iter(entries),
            })
        }

        async fn opendir(&self, _req: Request, _path: &OsStr, _flags: u32) -> fuse3::Result<ReplyOpen> {
            Ok(ReplyOpen { fh: 0, flags: 0 })
        }

        async fn open(&self, _req: Request, path: &OsStr, flags: u32) -> fuse3::Result<ReplyOpen> {
            let path = path_str(path)?.to_string();
            if wants_write(flags) {
                return Err(Errno::from(self.resolver.reject_write(&path).errno()));
            }

            let content = self
                .blocking(move |resolver| {
                    let mut query = Query::new().with_content();
                    resolver.resolve(&path, &mut query)?;
                    query.take_content().ok_or(FsError::IsADirectory { path })
                })
                .await?;

            let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
            self.handles.lock().await.insert(fh, content);
            Ok(ReplyOpen { fh, flags: 0 })
        }

        async fn read(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            size: u32,
        ) -> fuse3::Result<ReplyData> {
            let content = self
                .handles
                .lock()
                .await
                .get(&fh)
                .cloned()
                .ok_or(Errno::from(libc::EBADF))?;

            let fetcher = Arc::clone(&self.fetcher);
            let data = tokio::task::spawn_blocking(move || content.read_at(offset, size, fetcher.as_ref()))
                .await
                .map_err(|e| {
                    warn!("read task failed: {e}");
                    Errno::from(libc::EIO)
                })?
                .map_err(|e| {
                    warn!(fh, offset, "read failed: {e}");
                    Errno::from(libc::EIO)
                })?;
            Ok(ReplyData { data: Bytes::from(data) })
        }

        async fn readlink(&self, _req: Request, path: &OsStr) -> fuse3::Result<ReplyData> {
            let path = path_str(path)?.to_string();
            let target = self
                .blocking(move |resolver| {
                    let mut query = Query::new().with_link_target();
                    resolver.resolve(&path, &mut query)?;
                    query
                        .link_target()
                        .map(str::to_string)
                        .ok_or(FsError::InvalidOperation { path, op: "readlink" })
                })
                .await?;
            Ok(ReplyData {
                data: Bytes::from(target.into_bytes()),
            })
        }

        async fn mkdir(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            _mode: u32,
            _umask: u32,
        ) -> fuse3::Result<ReplyEntry> {
            let path = join(path_str(parent)?, path_str(name)?);
            Err(Errno::from(self.resolver.reject_write(&path).errno()))
        }

        async fn unlink(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            let path = join(path_str(parent)?, path_str(name)?);
            Err(Errno::from(self.resolver.reject_write(&path).errno()))
        }

        async fn rmdir(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            let path = join(path_str(parent)?, path_str(name)?);
            Err(Errno::from(self.resolver.reject_write(&path).errno()))
        }

        async fn create(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            _mode: u32,
            _flags: u32,
        ) -> fuse3::Result<ReplyCreated> {
            let path = join(path_str(parent)?, path_str(name)?);
            Err(Errno::from(self.resolver.reject_write(&path).errno()))
        }

        async fn release(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            _flags: u32,
            _lock_owner: u64,
            _flush: bool,
        ) -> fuse3::Result<()> {
            self.handles.lock().await.remove(&fh);
            Ok(())
        }

        async fn flush(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            _fh: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<()> {
            Ok(())
        }

        async fn statfs(&self, _req: Request, _path: &OsStr) -> fuse3::Result<ReplyStatFs> {
            Ok(ReplyStatFs {
                blocks: 0,
                bfree: 0,
                bavail: 0,
                files: 0,
                ffree: 0,
                bsize: 4096,
                namelen: 255,
                frsize: 4096,
            })
        }
    }

    // ── Public mount API ──────────────────────────────────────────────────────

    pub struct MountConfig {
        pub resolver: Arc<PathResolver>,
        pub fetcher: Arc<dyn UrlFetcher>,
        pub mountpoint: std::path::PathBuf,
        pub attr_ttl_secs: u64,
        pub allow_other: bool,
    }

    /// Mount the filesystem read-only and block until unmounted.
    ///
    /// Call from an async context. Returns when the filesystem is unmounted
    /// (e.g. via `fusermount3 -u <mountpoint>`).
    pub async fn mount(cfg: MountConfig) -> std::io::Result<()> {
        let fs = CdfsFs::new(cfg.resolver, cfg.fetcher, Duration::from_secs(cfg.attr_ttl_secs));

        let mut opts = MountOptions::default();
        opts.fs_name("cdfs");
        opts.read_only(true);
        opts.force_readdir_plus(true);
        if cfg.allow_other {
            opts.allow_other(true);
        }

        info!(mountpoint = %cfg.mountpoint.display(), "mounting cdfs (unprivileged via fusermount3)");

        let handle = Session::new(opts)
            .mount_with_unprivileged(fs, &cfg.mountpoint)
            .await?;

        handle.await
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn write_intent_flags() {
            assert!(!wants_write(libc::O_RDONLY as u32));
            assert!(wants_write(libc::O_WRONLY as u32));
            assert!(wants_write(libc::O_RDWR as u32));
            assert!(wants_write((libc::O_RDONLY | libc::O_TRUNC) as u32));
        }

        #[test]
        fn child_paths() {
            assert_eq!(join("/", "dev"), "/dev");
            assert_eq!(join("/dev/", "browse"), "/dev/browse");
        }
    }
}

#[cfg(feature = "fuse")]
pub use inner::{mount, CdfsFs, MountConfig};
