//! What a caller wants to learn about a path in one traversal.

use cdfs_core::{DirEntry, EntryKind, Stat};

use crate::content::FileContent;

/// Receives directory entries as the resolver produces them.
pub trait DirSink {
    fn push(&mut self, entry: DirEntry);
}

impl DirSink for Vec<DirEntry> {
    fn push(&mut self, entry: DirEntry) {
        Vec::push(self, entry);
    }
}

/// A set of requested operations and the slots they fill.
///
/// Build one with the `with_*` methods, hand it to
/// [`PathResolver::resolve`](crate::resolver::PathResolver::resolve), then
/// read back whichever slots were requested.
#[derive(Default)]
pub struct Query<'s> {
    want_stat: bool,
    want_content: bool,
    want_link: bool,
    sink: Option<&'s mut dyn DirSink>,
    stat: Option<Stat>,
    content: Option<FileContent>,
    link_target: Option<String>,
}

impl<'s> Query<'s> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stat(mut self) -> Self {
        self.want_stat = true;
        self
    }

    /// Request the directory listing, delivered entry by entry into `sink`.
    pub fn with_listing(mut self, sink: &'s mut dyn DirSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Request a readable handle on the file's content.
    pub fn with_content(mut self) -> Self {
        self.want_content = true;
        self
    }

    pub fn with_link_target(mut self) -> Self {
        self.want_link = true;
        self
    }

    pub fn stat(&self) -> Option<&Stat> {
        self.stat.as_ref()
    }

    pub fn take_content(&mut self) -> Option<FileContent> {
        self.content.take()
    }

    pub fn link_target(&self) -> Option<&str> {
        self.link_target.as_deref()
    }

    pub(crate) fn wants_stat(&self) -> bool {
        self.want_stat
    }

    pub(crate) fn wants_listing(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn wants_content(&self) -> bool {
        self.want_content
    }

    pub(crate) fn wants_link(&self) -> bool {
        self.want_link
    }

    pub(crate) fn set_stat(&mut self, stat: Stat) {
        self.stat = Some(stat);
    }

    pub(crate) fn set_content(&mut self, content: FileContent) {
        self.content = Some(content);
    }

    pub(crate) fn set_link_target(&mut self, target: String) {
        self.link_target = Some(target);
    }

    pub(crate) fn emit(&mut self, name: impl Into<String>, kind: EntryKind) {
        if let Some(sink) = self.sink.as_mut() {
            sink.push(DirEntry::new(name, kind));
        }
    }
}
