use thiserror::Error;

pub type CdfsResult<T> = Result<T, CdfsError>;

pub type FsResult<T> = Result<T, FsError>;

/// Boxed cause carried by filesystem errors that originate below the resolver.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CdfsError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced at the path-resolution boundary.
///
/// Each variant maps onto one POSIX errno via [`FsError::errno`].
#[derive(Debug, Error)]
pub enum FsError {
    /// No literal or dynamic branch matched. `matched` is the prefix of the
    /// path that did resolve before the failure.
    #[error("no such entry: {path} (resolved up to {matched:?})")]
    NotFound {
        path: String,
        matched: String,
        #[source]
        cause: Option<Cause>,
    },

    #[error("catalog fetch failed for {path}")]
    BrowseFailed {
        path: String,
        #[source]
        source: Cause,
    },

    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    /// Operation requested against an entry that cannot honour it, e.g.
    /// `readlink` on a directory.
    #[error("{op} not supported on {path}")]
    InvalidOperation { path: String, op: &'static str },

    #[error("read-only filesystem: {path}")]
    PermissionDenied { path: String },

    #[error("out of memory")]
    OutOfMemory,
}

impl FsError {
    pub fn not_found(path: &str, matched: &str) -> Self {
        FsError::NotFound {
            path: path.to_string(),
            matched: matched.to_string(),
            cause: None,
        }
    }

    /// The errno reported to the kernel for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound { .. } => libc::ENOENT,
            FsError::BrowseFailed { .. } => libc::EIO,
            FsError::NotADirectory { .. } => libc::ENOTDIR,
            FsError::IsADirectory { .. } => libc::EISDIR,
            FsError::InvalidOperation { .. } => libc::EINVAL,
            FsError::PermissionDenied { .. } => libc::EACCES,
            FsError::OutOfMemory => libc::ENOMEM,
        }
    }
}
