use serde::{Deserialize, Serialize};

/// Kind of an entry in the projected namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// Attributes reported for a resolved path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub kind: EntryKind,
    /// Content length for files, target length for symlinks, 0 for directories
    pub size: u64,
    pub nlink: u32,
}

impl Stat {
    pub fn directory(subdirs: usize) -> Self {
        Stat {
            kind: EntryKind::Directory,
            size: 0,
            nlink: u32::try_from(subdirs).unwrap_or(u32::MAX).saturating_add(2),
        }
    }

    pub fn file(size: u64) -> Self {
        Stat {
            kind: EntryKind::File,
            size,
            nlink: 1,
        }
    }

    pub fn symlink(target: &str) -> Self {
        Stat {
            kind: EntryKind::Symlink,
            size: target.len() as u64,
            nlink: 1,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One entry produced by a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        DirEntry {
            name: name.into(),
            kind,
        }
    }
}
