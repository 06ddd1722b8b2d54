//! A [`CatalogService`] answering from a JSON snapshot of a catalog.
//!
//! Snapshot format:
//! ```json
//! {
//!   "search_capabilities": "dc:title,upnp:class",
//!   "page_limit": null,
//!   "objects": [
//!     { "id": "0",  "parent_id": "-1", "title": "Root", "container": true },
//!     { "id": "1",  "parent_id": "0",  "title": "Music", "container": true,
//!       "class": "object.container.storageFolder" },
//!     { "id": "11", "parent_id": "1",  "title": "song.mp3",
//!       "class": "object.item.audioItem.musicTrack",
//!       "resources": [ { "uri": "http://10.0.0.2/11.mp3",
//!                        "protocol_info": "http-get:*:audio/mpeg:*",
//!                        "size": 4096 } ] }
//!   ]
//! }
//! ```
//!
//! Children are listed in file order. `page_limit` caps every answer while
//! TotalMatches still reports the full count, which is how some servers
//! misbehave in the wild.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::service::{BrowseFlag, BrowsePage, CatalogService, RawObject, RemoteError};

/// UPnP ContentDirectory error codes
const ERR_NO_SUCH_OBJECT: u32 = 701;
const ERR_BAD_SEARCH_CRITERIA: u32 = 708;
const ERR_NO_SUCH_CONTAINER: u32 = 710;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("reading snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate object id {0:?}")]
    DuplicateId(String),
}

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    search_capabilities: String,
    #[serde(default)]
    page_limit: Option<u32>,
    objects: Vec<RawObject>,
}

#[derive(Debug)]
pub struct SnapshotCatalog {
    objects: Vec<RawObject>,
    by_id: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
    search_capabilities: String,
    page_limit: Option<u32>,
}

impl SnapshotCatalog {
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let file: SnapshotFile = serde_json::from_str(json)?;
        Self::from_objects(file.objects, file.search_capabilities, file.page_limit)
    }

    pub fn from_objects(
        mut objects: Vec<RawObject>,
        search_capabilities: String,
        page_limit: Option<u32>,
    ) -> Result<Self, SnapshotError> {
        let mut by_id = HashMap::with_capacity(objects.len());
        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, object) in objects.iter_mut().enumerate() {
            if by_id.insert(object.id.clone(), idx).is_some() {
                return Err(SnapshotError::DuplicateId(object.id.clone()));
            }
            if object.didl.is_empty() {
                object.didl = didl_fragment(object);
            }
            children.entry(object.parent_id.clone()).or_default().push(idx);
        }
        Ok(SnapshotCatalog {
            objects,
            by_id,
            children,
            search_capabilities,
            page_limit,
        })
    }

    /// Cap every answer at `limit` objects.
    pub fn with_page_limit(mut self, limit: Option<u32>) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn object(&self, id: &str) -> Result<&RawObject, RemoteError> {
        self.by_id
            .get(id)
            .map(|&idx| &self.objects[idx])
            .ok_or_else(|| RemoteError::Fault {
                code: ERR_NO_SUCH_OBJECT,
                description: format!("No such object: {id}"),
            })
    }

    fn children_of(&self, id: &str) -> impl Iterator<Item = &RawObject> {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.objects[idx])
    }

    /// Depth-first walk of everything below `id`, excluding `id` itself.
    fn descendants(&self, id: &str) -> Vec<&RawObject> {
        let mut out = Vec::new();
        let mut stack: Vec<&RawObject> = self.children_of(id).collect();
        stack.reverse();
        while let Some(object) = stack.pop() {
            out.push(object);
            if object.is_container {
                let mut below: Vec<&RawObject> = self.children_of(&object.id).collect();
                below.reverse();
                stack.extend(below);
            }
        }
        out
    }

    fn page(&self, matches: Vec<&RawObject>, start: u32, count: u32) -> BrowsePage {
        let total = matches.len();
        let mut selected: Vec<RawObject> = matches
            .into_iter()
            .skip(start as usize)
            .take(if count == 0 { usize::MAX } else { count as usize })
            .cloned()
            .collect();
        if let Some(limit) = self.page_limit {
            selected.truncate(limit as usize);
        }
        BrowsePage {
            total_matches: u32::try_from(total).unwrap_or(u32::MAX),
            number_returned: u32::try_from(selected.len()).unwrap_or(u32::MAX),
            objects: selected,
        }
    }
}

impl CatalogService for SnapshotCatalog {
    fn browse(
        &self,
        object_id: &str,
        flag: BrowseFlag,
        start_index: u32,
        requested_count: u32,
    ) -> Result<BrowsePage, RemoteError> {
        let object = self.object(object_id)?;
        match flag {
            BrowseFlag::Metadata => Ok(self.page(vec![object], start_index, requested_count)),
            BrowseFlag::DirectChildren => {
                if !object.is_container {
                    return Err(RemoteError::Fault {
                        code: ERR_NO_SUCH_CONTAINER,
                        description: format!("Not a container: {object_id}"),
                    });
                }
                let matches = self.children_of(object_id).collect();
                Ok(self.page(matches, start_index, requested_count))
            }
        }
    }

    fn search(
        &self,
        container_id: &str,
        criteria: &str,
        start_index: u32,
        requested_count: u32,
    ) -> Result<BrowsePage, RemoteError> {
        self.object(container_id)?;
        let filter = SearchFilter::parse(criteria)?;
        let matches = self
            .descendants(container_id)
            .into_iter()
            .filter(|object| filter.matches(object))
            .collect();
        Ok(self.page(matches, start_index, requested_count))
    }

    fn search_capabilities(&self) -> Result<String, RemoteError> {
        Ok(self.search_capabilities.clone())
    }
}

/// The subset of ContentDirectory search syntax a snapshot understands:
/// `*`, `<prop> contains "<text>"` and `<prop> derivedfrom "<class>"` on
/// `dc:title` and `upnp:class`.
enum SearchFilter {
    All,
    Contains { property: Property, needle: String },
    DerivedFrom { class: String },
}

#[derive(Clone, Copy)]
enum Property {
    Title,
    Class,
}

impl SearchFilter {
    fn parse(criteria: &str) -> Result<Self, RemoteError> {
        let criteria = criteria.trim();
        if criteria == "*" {
            return Ok(SearchFilter::All);
        }
        let invalid = || RemoteError::Fault {
            code: ERR_BAD_SEARCH_CRITERIA,
            description: format!("Unsupported search criteria: {criteria}"),
        };

        let mut parts = criteria.splitn(3, char::is_whitespace);
        let property = parts.next().ok_or_else(invalid)?;
        let op = parts.next().ok_or_else(invalid)?;
        let value = parts
            .next()
            .map(str::trim)
            .and_then(|v| v.strip_prefix('"'))
            .and_then(|v| v.strip_suffix('"'))
            .ok_or_else(invalid)?;

        let property = match property {
            "dc:title" => Property::Title,
            "upnp:class" => Property::Class,
            _ => return Err(invalid()),
        };
        match (op, property) {
            ("contains", _) => Ok(SearchFilter::Contains {
                property,
                needle: value.to_lowercase(),
            }),
            ("derivedfrom", Property::Class) => Ok(SearchFilter::DerivedFrom {
                class: value.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    fn matches(&self, object: &RawObject) -> bool {
        match self {
            SearchFilter::All => true,
            SearchFilter::Contains { property, needle } => {
                let haystack = match property {
                    Property::Title => &object.title,
                    Property::Class => &object.class,
                };
                haystack.to_lowercase().contains(needle.as_str())
            }
            SearchFilter::DerivedFrom { class } => object.class.starts_with(class.as_str()),
        }
    }
}

/// Render the DIDL-Lite element describing `object`.
fn didl_fragment(object: &RawObject) -> String {
    let tag = if object.is_container { "container" } else { "item" };
    let mut out = format!(
        "<{tag} id=\"{}\" parentID=\"{}\" restricted=\"1\">\n  <dc:title>{}</dc:title>\n  <upnp:class>{}</upnp:class>\n",
        xml_escape(&object.id),
        xml_escape(&object.parent_id),
        xml_escape(&object.title),
        xml_escape(&object.class),
    );
    for res in &object.resources {
        out.push_str(&format!("  <res protocolInfo=\"{}\"", xml_escape(&res.protocol_info)));
        if let Some(size) = res.size {
            out.push_str(&format!(" size=\"{size}\""));
        }
        out.push_str(&format!(">{}</res>\n", xml_escape(&res.uri)));
    }
    out.push_str(&format!("</{tag}>"));
    out
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "search_capabilities": "dc:title,upnp:class",
        "objects": [
            { "id": "0", "parent_id": "-1", "title": "Root", "container": true },
            { "id": "1", "parent_id": "0", "title": "Music", "container": true },
            { "id": "2", "parent_id": "0", "title": "Video", "container": true },
            { "id": "11", "parent_id": "1", "title": "Blue & Green",
              "class": "object.item.audioItem.musicTrack",
              "resources": [ { "uri": "http://h/11.mp3", "protocol_info": "http-get:*:audio/mpeg:*", "size": 10 } ] },
            { "id": "12", "parent_id": "1", "title": "Red", "class": "object.item.audioItem.musicTrack" },
            { "id": "21", "parent_id": "2", "title": "Blue Movie", "class": "object.item.videoItem" }
        ]
    }"#;

    fn catalog() -> SnapshotCatalog {
        SnapshotCatalog::from_json(SNAPSHOT).unwrap()
    }

    fn ids(page: &BrowsePage) -> Vec<&str> {
        page.objects.iter().map(|o| o.id.as_str()).collect()
    }

    #[test]
    fn browse_direct_children_in_file_order() {
        let page = catalog().browse("0", BrowseFlag::DirectChildren, 0, 0).unwrap();
        assert_eq!(ids(&page), ["1", "2"]);
        assert_eq!(page.total_matches, 2);
        assert_eq!(page.number_returned, 2);
    }

    #[test]
    fn browse_honours_start_and_count() {
        let page = catalog().browse("1", BrowseFlag::DirectChildren, 1, 1).unwrap();
        assert_eq!(ids(&page), ["12"]);
        assert_eq!(page.total_matches, 2);
    }

    #[test]
    fn page_limit_truncates_but_reports_total() {
        let catalog = catalog().with_page_limit(Some(1));
        let page = catalog.browse("0", BrowseFlag::DirectChildren, 0, 0).unwrap();
        assert_eq!(page.number_returned, 1);
        assert_eq!(page.total_matches, 2);
    }

    #[test]
    fn browse_metadata_returns_object_itself() {
        let page = catalog().browse("11", BrowseFlag::Metadata, 0, 0).unwrap();
        assert_eq!(ids(&page), ["11"]);
        assert!(page.objects[0].didl.contains("<dc:title>Blue &amp; Green</dc:title>"));
        assert!(page.objects[0].didl.contains("size=\"10\""));
    }

    #[test]
    fn unknown_object_is_a_fault() {
        let err = catalog().browse("99", BrowseFlag::DirectChildren, 0, 0).unwrap_err();
        assert!(matches!(err, RemoteError::Fault { code: 701, .. }));
        let err = catalog().browse("12", BrowseFlag::DirectChildren, 0, 0).unwrap_err();
        assert!(matches!(err, RemoteError::Fault { code: 710, .. }));
    }

    #[test]
    fn search_walks_subtree() {
        let catalog = catalog();
        let page = catalog.search("0", "dc:title contains \"blue\"", 0, 0).unwrap();
        assert_eq!(ids(&page), ["11", "21"]);

        let page = catalog
            .search("0", "upnp:class derivedfrom \"object.item.audioItem\"", 0, 0)
            .unwrap();
        assert_eq!(ids(&page), ["11", "12"]);

        let page = catalog.search("1", "*", 0, 0).unwrap();
        assert_eq!(ids(&page), ["11", "12"]);
    }

    #[test]
    fn unsupported_search_is_a_fault() {
        let err = catalog().search("0", "dc:creator = \"x\"", 0, 0).unwrap_err();
        assert!(matches!(err, RemoteError::Fault { code: 708, .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let json = r#"{"objects":[{"id":"0","container":true},{"id":"0"}]}"#;
        assert!(matches!(
            SnapshotCatalog::from_json(json),
            Err(SnapshotError::DuplicateId(_))
        ));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, SNAPSHOT).unwrap();
        let catalog = SnapshotCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 6);
        assert_eq!(catalog.search_capabilities().unwrap(), "dc:title,upnp:class");
    }
}
