//! Path resolution over fixed branches and dynamically browsed catalogs.
//!
//! ## Namespace
//!
//! ```text
//! /
//!   devices                     file: one registered device name per line
//!   <device>/                   one directory per registered device
//!     status                    file: device description
//!     browse/                   container "0", browsed on demand
//!       <container>/            catalog containers, by basename
//!       <item>.<ext>            media file (remote, ranged reads)
//!       <item>.m3u              playlist, for unknown or oversized media
//!       .metadata/<name>.xml    DIDL-Lite of every child (listed on request)
//!     search/
//!       .capabilities           file: searchable properties
//!       <expression>/           search results below container "0"
//!         <container>           symlink → ../../by-id/<escaped id>
//!         <item>.<ext>          as in browse/
//!     by-id/<escaped id>/       any container addressed by object id
//!   .debug/
//!     cache                     file: per-device cache statistics
//! ```
//!
//! A path is resolved in a single left-to-right pass: at each level the
//! literal branches are tried in a fixed order and the first one whose name
//! equals the next component wins; there is no backtracking into siblings.
//! Inside a catalog, each level costs one (usually cached) browse of the
//! current container. The browse result is dropped before descending, so no
//! listing is held across the next remote call.

use std::sync::Arc;

use cdfs_catalog::{BrowseError, CatalogBrowser, CatalogNode, ChildrenSet, Criteria};
use cdfs_core::{EntryKind, FsError, FsResult, Stat};
use tracing::{debug, trace};

use crate::content::FileContent;
use crate::cursor::PathCursor;
use crate::media::MediaResolver;
use crate::naming::{escape_id, unescape_id, with_extension};
use crate::query::Query;
use crate::registry::DeviceRegistry;

/// Object id of a ContentDirectory's root container.
pub const ROOT_CONTAINER: &str = "0";

const DEVICES_FILE: &str = "devices";
const DEBUG_DIR: &str = ".debug";
const CACHE_FILE: &str = "cache";
const STATUS_FILE: &str = "status";
const BROWSE_DIR: &str = "browse";
const SEARCH_DIR: &str = "search";
const BY_ID_DIR: &str = "by-id";
const METADATA_DIR: &str = ".metadata";
const CAPABILITIES_FILE: &str = ".capabilities";
const PLAYLIST_EXT: &str = "m3u";

const DIDL_HEADER: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\" \
xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\">\n";

/// What the resolved path turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matched {
    Directory,
    File,
    Symlink,
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Media larger than this is exposed as a playlist instead of a file
    pub playlist_threshold: u64,
    /// List `.metadata` in browse directories
    pub show_metadata: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            playlist_threshold: 2048 * 1024 * 1024,
            show_metadata: false,
        }
    }
}

/// How catalog containers are presented in a listing.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Presentation {
    /// Containers are directories (browse/, by-id/)
    Browse,
    /// Containers are symlinks into by-id/ (search results)
    Search,
}

/// A child of a catalog listing matched by name.
enum ChildMatch {
    Container(String),
    Link(String),
    File(FileContent),
}

pub struct PathResolver {
    registry: Arc<dyn DeviceRegistry>,
    media: Arc<dyn MediaResolver>,
    options: ResolverOptions,
}

impl PathResolver {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        media: Arc<dyn MediaResolver>,
        options: ResolverOptions,
    ) -> Self {
        PathResolver {
            registry,
            media,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    /// Resolve `path`, filling every slot `query` asks for.
    pub fn resolve(&self, path: &str, query: &mut Query<'_>) -> FsResult<Matched> {
        let mut cursor = PathCursor::new(path);
        let result = self.root(&mut cursor, query);
        match &result {
            Ok(matched) => trace!(path, ?matched, "resolved"),
            Err(e) => debug!(path, errno = e.errno(), "resolve failed: {e}"),
        }
        result
    }

    /// Every write-intent operation ends here: the namespace is read-only.
    pub fn reject_write(&self, path: &str) -> FsError {
        FsError::PermissionDenied {
            path: path.to_string(),
        }
    }

    // ── Fixed branches ────────────────────────────────────────────────────────

    fn root(&self, cursor: &mut PathCursor<'_>, query: &mut Query<'_>) -> FsResult<Matched> {
        if cursor.at_end() {
            let names = self.registry.device_names();
            return finish_dir(cursor, query, names.len() + 1, |q| {
                q.emit(DEVICES_FILE, EntryKind::File);
                for name in names {
                    q.emit(name, EntryKind::Directory);
                }
                q.emit(DEBUG_DIR, EntryKind::Directory);
            });
        }

        if cursor.take_literal(DEVICES_FILE) {
            return finish_file(cursor, query, FileContent::Text(self.devices_text()));
        }
        for name in self.registry.device_names() {
            if cursor.take_literal(&name) {
                return self.device(&name, cursor, query);
            }
        }
        if cursor.take_literal(DEBUG_DIR) {
            return self.debug_dir(cursor, query);
        }
        Err(not_found(cursor))
    }

    fn devices_text(&self) -> String {
        self.registry
            .device_names()
            .into_iter()
            .map(|name| name + "\n")
            .collect()
    }

    fn debug_dir(&self, cursor: &mut PathCursor<'_>, query: &mut Query<'_>) -> FsResult<Matched> {
        if cursor.at_end() {
            return finish_dir(cursor, query, 0, |q| q.emit(CACHE_FILE, EntryKind::File));
        }
        if cursor.take_literal(CACHE_FILE) {
            let mut text = String::new();
            for name in self.registry.device_names() {
                match self.registry.browser(&name).and_then(|b| b.cache_stats()) {
                    Some(stats) => text.push_str(&stats.to_string()),
                    None => text.push_str(&format!("cache \"{name}\" disabled\n")),
                }
            }
            return finish_file(cursor, query, FileContent::Text(text));
        }
        Err(not_found(cursor))
    }

    fn device(&self, name: &str, cursor: &mut PathCursor<'_>, query: &mut Query<'_>) -> FsResult<Matched> {
        // The device may have left between listing the root and getting here
        let browser = self.registry.browser(name).ok_or_else(|| not_found(cursor))?;

        if cursor.at_end() {
            return finish_dir(cursor, query, 3, |q| {
                q.emit(STATUS_FILE, EntryKind::File);
                q.emit(BROWSE_DIR, EntryKind::Directory);
                q.emit(SEARCH_DIR, EntryKind::Directory);
                q.emit(BY_ID_DIR, EntryKind::Directory);
            });
        }

        if cursor.take_literal(STATUS_FILE) {
            let text = self
                .registry
                .status_text(name)
                .ok_or_else(|| not_found(cursor))?;
            return finish_file(cursor, query, FileContent::Text(text));
        }
        if cursor.take_literal(BROWSE_DIR) {
            return self.container(&browser, ROOT_CONTAINER.to_string(), cursor, query);
        }
        if cursor.take_literal(SEARCH_DIR) {
            return self.search_dir(&browser, cursor, query);
        }
        if cursor.take_literal(BY_ID_DIR) {
            return self.by_id_dir(&browser, cursor, query);
        }
        Err(not_found(cursor))
    }

    fn search_dir(
        &self,
        browser: &CatalogBrowser,
        cursor: &mut PathCursor<'_>,
        query: &mut Query<'_>,
    ) -> FsResult<Matched> {
        if cursor.at_end() {
            return finish_dir(cursor, query, 0, |q| q.emit(CAPABILITIES_FILE, EntryKind::File));
        }
        if cursor.take_literal(CAPABILITIES_FILE) {
            let caps = browser.service().search_capabilities().map_err(|e| FsError::BrowseFailed {
                path: cursor.path().to_string(),
                source: Box::new(e),
            })?;
            return finish_file(cursor, query, FileContent::Text(caps + "\n"));
        }

        let Some(expression) = cursor.peek() else {
            return Err(not_found(cursor));
        };
        let criteria = Criteria::Search(expression.to_string());
        let fetched = browser.browse_or_search(ROOT_CONTAINER, &criteria);
        let failed_at = cursor.clone();
        cursor.next_component();

        if cursor.at_end() {
            let result = fetched.map_err(|e| browse_failed(&failed_at, e))?;
            return self.finish_listing(cursor, &result.children, query, Presentation::Search);
        }
        let result = fetched.map_err(|e| not_found_because(&failed_at, e))?;
        self.child(&result.children, cursor, query, Presentation::Search)
    }

    fn by_id_dir(
        &self,
        browser: &CatalogBrowser,
        cursor: &mut PathCursor<'_>,
        query: &mut Query<'_>,
    ) -> FsResult<Matched> {
        if cursor.at_end() {
            // Object ids are not enumerable
            return finish_dir(cursor, query, 0, |_| {});
        }
        let id = cursor
            .peek()
            .and_then(unescape_id)
            .ok_or_else(|| not_found(cursor))?;
        let before = cursor.clone();
        cursor.next_component();
        if cursor.at_end() {
            // An unknown id is a missing entry, not an I/O error
            let result = browser
                .browse(&id)
                .map_err(|e| not_found_because(&before, e))?;
            return self.finish_listing(cursor, &result.children, query, Presentation::Browse);
        }
        self.container(browser, id, cursor, query)
    }

    // ── Catalog containers ────────────────────────────────────────────────────

    /// Walk down from container `id`, one browse per path component.
    fn container(
        &self,
        browser: &CatalogBrowser,
        mut id: String,
        cursor: &mut PathCursor<'_>,
        query: &mut Query<'_>,
    ) -> FsResult<Matched> {
        loop {
            if cursor.at_end() {
                let result = browser.browse(&id).map_err(|e| browse_failed(cursor, e))?;
                return self.finish_listing(cursor, &result.children, query, Presentation::Browse);
            }

            let result = browser.browse(&id).map_err(|e| not_found_because(cursor, e))?;
            if cursor.take_literal(METADATA_DIR) {
                return self.metadata_dir(&result.children, cursor, query);
            }
            match self.find_child(&result.children, cursor, Presentation::Browse) {
                Some(ChildMatch::Container(child_id)) => {
                    cursor.next_component();
                    id = child_id;
                }
                found => return self.finish_child(found, cursor, query),
            }
        }
    }

    /// Resolve the next component among the children of a search result.
    fn child(
        &self,
        children: &ChildrenSet,
        cursor: &mut PathCursor<'_>,
        query: &mut Query<'_>,
        presentation: Presentation,
    ) -> FsResult<Matched> {
        if cursor.take_literal(METADATA_DIR) {
            return self.metadata_dir(children, cursor, query);
        }
        let found = self.find_child(children, cursor, presentation);
        self.finish_child(found, cursor, query)
    }

    fn finish_child(
        &self,
        found: Option<ChildMatch>,
        cursor: &mut PathCursor<'_>,
        query: &mut Query<'_>,
    ) -> FsResult<Matched> {
        match found {
            Some(ChildMatch::File(content)) => {
                cursor.next_component();
                finish_file(cursor, query, content)
            }
            Some(ChildMatch::Link(target)) => {
                cursor.next_component();
                finish_symlink(cursor, query, target)
            }
            // Containers are only descended through `container`
            Some(ChildMatch::Container(_)) | None => Err(not_found(cursor)),
        }
    }

    /// Linear scan of a listing for the cursor's next component.
    fn find_child(
        &self,
        children: &ChildrenSet,
        cursor: &PathCursor<'_>,
        presentation: Presentation,
    ) -> Option<ChildMatch> {
        let component = cursor.peek()?;
        for node in children.objects() {
            if node.is_container {
                if node.basename == component {
                    return Some(match presentation {
                        Presentation::Browse => ChildMatch::Container(node.id.clone()),
                        Presentation::Search => ChildMatch::Link(link_target(node)),
                    });
                }
            } else if let Some((name, content)) = self.item_file(node) {
                if name == component {
                    return Some(ChildMatch::File(content));
                }
            }
        }
        None
    }

    fn finish_listing(
        &self,
        cursor: &PathCursor<'_>,
        children: &ChildrenSet,
        query: &mut Query<'_>,
        presentation: Presentation,
    ) -> FsResult<Matched> {
        let show_metadata = self.options.show_metadata;
        let subdirs = match presentation {
            Presentation::Browse => children.nb_containers() + usize::from(show_metadata),
            Presentation::Search => usize::from(show_metadata),
        };
        finish_dir(cursor, query, subdirs, |q| {
            for node in children.objects() {
                if node.is_container {
                    let kind = match presentation {
                        Presentation::Browse => EntryKind::Directory,
                        Presentation::Search => EntryKind::Symlink,
                    };
                    q.emit(node.basename.as_str(), kind);
                } else if let Some((name, _)) = self.item_file(node) {
                    q.emit(name, EntryKind::File);
                }
            }
            if show_metadata {
                q.emit(METADATA_DIR, EntryKind::Directory);
            }
        })
    }

    fn metadata_dir(
        &self,
        children: &ChildrenSet,
        cursor: &mut PathCursor<'_>,
        query: &mut Query<'_>,
    ) -> FsResult<Matched> {
        if cursor.at_end() {
            return finish_dir(cursor, query, 0, |q| {
                for node in children.objects() {
                    q.emit(metadata_name(node), EntryKind::File);
                }
            });
        }
        let component = cursor.peek().unwrap_or_default();
        let node = children
            .objects()
            .iter()
            .find(|node| metadata_name(node) == component)
            .ok_or_else(|| not_found(cursor))?;
        cursor.next_component();
        let document = format!("{DIDL_HEADER}{}\n</DIDL-Lite>\n", node.raw_payload);
        finish_file(cursor, query, FileContent::Text(document))
    }

    /// The file an item is exposed as, if it has anything to read.
    ///
    /// Media of known size up to the threshold is served directly; anything
    /// else (unknown size, too large, or itself a playlist) gets a generated
    /// `.m3u` pointing at it.
    fn item_file(&self, node: &CatalogNode) -> Option<(String, FileContent)> {
        let variant = self.media.preferred_variant(node)?;
        match variant.known_size {
            Some(size) if !variant.is_playlist && size <= self.options.playlist_threshold => {
                let name = with_extension(&node.basename, &variant.extension);
                Some((
                    name,
                    FileContent::Url {
                        uri: variant.uri,
                        size,
                    },
                ))
            }
            _ => {
                let name = with_extension(&node.basename, PLAYLIST_EXT);
                Some((name, FileContent::Text(self.media.playlist_content(&variant))))
            }
        }
    }
}

// ── Emitters ──────────────────────────────────────────────────────────────────

fn finish_dir(
    cursor: &PathCursor<'_>,
    query: &mut Query<'_>,
    subdirs: usize,
    list: impl FnOnce(&mut Query<'_>),
) -> FsResult<Matched> {
    if query.wants_content() {
        return Err(FsError::IsADirectory {
            path: cursor.path().to_string(),
        });
    }
    if query.wants_link() {
        return Err(FsError::InvalidOperation {
            path: cursor.path().to_string(),
            op: "readlink",
        });
    }
    if query.wants_stat() {
        query.set_stat(Stat::directory(subdirs));
    }
    if query.wants_listing() {
        query.emit(".", EntryKind::Directory);
        query.emit("..", EntryKind::Directory);
        list(query);
    }
    Ok(Matched::Directory)
}

fn finish_file(cursor: &PathCursor<'_>, query: &mut Query<'_>, content: FileContent) -> FsResult<Matched> {
    if !cursor.at_end() || query.wants_listing() {
        return Err(FsError::NotADirectory {
            path: cursor.matched(),
        });
    }
    if query.wants_link() {
        return Err(FsError::InvalidOperation {
            path: cursor.path().to_string(),
            op: "readlink",
        });
    }
    if query.wants_stat() {
        query.set_stat(Stat::file(content.size()));
    }
    if query.wants_content() {
        query.set_content(content);
    }
    Ok(Matched::File)
}

fn finish_symlink(cursor: &PathCursor<'_>, query: &mut Query<'_>, target: String) -> FsResult<Matched> {
    if !cursor.at_end() || query.wants_listing() {
        return Err(FsError::NotADirectory {
            path: cursor.matched(),
        });
    }
    if query.wants_content() {
        return Err(FsError::InvalidOperation {
            path: cursor.path().to_string(),
            op: "read",
        });
    }
    if query.wants_stat() {
        query.set_stat(Stat::symlink(&target));
    }
    if query.wants_link() {
        query.set_link_target(target);
    }
    Ok(Matched::Symlink)
}

fn link_target(node: &CatalogNode) -> String {
    format!("../../{BY_ID_DIR}/{}", escape_id(&node.id))
}

fn metadata_name(node: &CatalogNode) -> String {
    format!("{}.xml", node.basename)
}

// ── Errors ────────────────────────────────────────────────────────────────────

fn not_found(cursor: &PathCursor<'_>) -> FsError {
    FsError::not_found(cursor.path(), &cursor.matched())
}

/// A fetch failed while descending: the path below it cannot exist for us.
fn not_found_because(cursor: &PathCursor<'_>, err: BrowseError) -> FsError {
    match err {
        BrowseError::Cache(_) => FsError::OutOfMemory,
        err => FsError::NotFound {
            path: cursor.path().to_string(),
            matched: cursor.matched(),
            cause: Some(Box::new(err)),
        },
    }
}

/// A fetch failed for the directory being listed or stat'ed.
fn browse_failed(cursor: &PathCursor<'_>, err: BrowseError) -> FsError {
    match err {
        BrowseError::Cache(_) => FsError::OutOfMemory,
        err => FsError::BrowseFailed {
            path: cursor.path().to_string(),
            source: Box::new(err),
        },
    }
}
