pub mod config;
pub mod error;
pub mod types;

pub use error::{CdfsError, CdfsResult, FsError, FsResult};
pub use types::{DirEntry, EntryKind, Stat};
