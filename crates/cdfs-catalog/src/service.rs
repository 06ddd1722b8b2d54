//! The remote ContentDirectory primitive consumed by [`CatalogBrowser`].
//!
//! Transport (SOAP action invocation, discovery, eventing) lives behind
//! [`CatalogService`]; this crate only sees parsed pages.
//!
//! [`CatalogBrowser`]: crate::browser::CatalogBrowser

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::Resource;

/// Criteria string meaning "list the direct children of the container".
pub const DIRECT_CHILDREN: &str = "BrowseDirectChildren";

/// Criteria string meaning "describe the object itself".
pub const METADATA: &str = "BrowseMetadata";

/// Browse mode requested from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Criteria {
    DirectChildren,
    Metadata,
    /// Free-form ContentDirectory search expression
    Search(String),
}

impl Criteria {
    pub fn as_str(&self) -> &str {
        match self {
            Criteria::DirectChildren => DIRECT_CHILDREN,
            Criteria::Metadata => METADATA,
            Criteria::Search(expr) => expr,
        }
    }

    /// Cache key for a container browsed under this criteria. Direct
    /// children use the bare id; everything else is `id\tcriteria`. Search
    /// expressions are tagged so that one spelled like a browse flag never
    /// shares the metadata slot.
    pub fn cache_key(&self, container_id: &str) -> String {
        match self {
            Criteria::DirectChildren => container_id.to_string(),
            Criteria::Metadata => format!("{container_id}\t{METADATA}"),
            Criteria::Search(expr) => format!("{container_id}\tsearch:{expr}"),
        }
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BrowseFlag argument of the Browse action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseFlag {
    DirectChildren,
    Metadata,
}

/// An object as parsed from a DIDL-Lite result, before name derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObject {
    pub id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub class: String,
    #[serde(default, rename = "container")]
    pub is_container: bool,
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// The `<item>`/`<container>` element this object was parsed from
    #[serde(default)]
    pub didl: String,
}

/// One answer of Browse or Search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowsePage {
    /// TotalMatches; 0 when the server cannot tell
    pub total_matches: u32,
    /// NumberReturned
    pub number_returned: u32,
    pub objects: Vec<RawObject>,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("UPnP fault {code}: {description}")]
    Fault { code: u32, description: String },
}

/// A ContentDirectory service on one device.
///
/// Calls block the calling thread until the remote answers or its own
/// timeout fires. `requested_count == 0` means "everything from
/// `start_index` on".
pub trait CatalogService: Send + Sync {
    fn browse(
        &self,
        object_id: &str,
        flag: BrowseFlag,
        start_index: u32,
        requested_count: u32,
    ) -> Result<BrowsePage, RemoteError>;

    fn search(
        &self,
        container_id: &str,
        criteria: &str,
        start_index: u32,
        requested_count: u32,
    ) -> Result<BrowsePage, RemoteError>;

    /// Comma-separated list of searchable properties; empty if the service
    /// does not support Search.
    fn search_capabilities(&self) -> Result<String, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_children_key_is_bare_id() {
        assert_eq!(Criteria::DirectChildren.cache_key("0"), "0");
    }

    #[test]
    fn other_criteria_get_distinct_keys() {
        let meta = Criteria::Metadata.cache_key("0");
        let search = Criteria::Search("dc:title contains \"x\"".into()).cache_key("0");
        assert_eq!(meta, "0\tBrowseMetadata");
        assert_eq!(search, "0\tsearch:dc:title contains \"x\"");
        assert_ne!(meta, search);
    }

    #[test]
    fn search_spelled_like_a_browse_flag_keeps_its_own_key() {
        let meta = Criteria::Metadata.cache_key("0");
        let search = Criteria::Search(METADATA.into()).cache_key("0");
        let children = Criteria::Search(DIRECT_CHILDREN.into()).cache_key("0");
        assert_ne!(meta, search);
        assert_ne!(Criteria::DirectChildren.cache_key("0"), children);
    }

    #[test]
    fn raw_object_from_json_defaults() {
        let raw: RawObject = serde_json::from_str(r#"{"id":"1$2","title":"A","container":true}"#).unwrap();
        assert!(raw.is_container);
        assert!(raw.resources.is_empty());
        assert_eq!(raw.parent_id, "");
    }
}
