//! Catalog nodes (DIDL objects) and their filesystem-safe basenames.

use serde::{Deserialize, Serialize};

use crate::service::RawObject;

/// Prefix of the fallback basename given to nodes whose title is unusable.
pub const ID_BASENAME_PREFIX: &str = "-id-";

/// One `<res>` element: a way of fetching the object's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    /// UPnP protocolInfo, e.g. `http-get:*:audio/mpeg:*`
    #[serde(default)]
    pub protocol_info: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl Resource {
    /// MIME type from the third protocolInfo field, if present.
    pub fn mime_type(&self) -> Option<&str> {
        self.protocol_info
            .split(':')
            .nth(2)
            .filter(|m| !m.is_empty() && *m != "*")
    }
}

/// A catalog object as exposed to the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogNode {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    /// upnp:class, e.g. `object.item.audioItem.musicTrack`
    pub class: String,
    pub is_container: bool,
    /// Filesystem-safe name derived from the title
    pub basename: String,
    pub resources: Vec<Resource>,
    /// The object's DIDL-Lite element, verbatim
    pub raw_payload: String,
}

impl CatalogNode {
    /// Build a node from a parsed remote object. Objects without an id cannot
    /// be addressed and are rejected.
    pub fn from_raw(raw: RawObject) -> Option<Self> {
        if raw.id.is_empty() {
            return None;
        }
        let basename = basename_for(&raw.title, &raw.id);
        Some(CatalogNode {
            id: raw.id,
            parent_id: raw.parent_id,
            title: raw.title,
            class: raw.class,
            is_container: raw.is_container,
            basename,
            resources: raw.resources,
            raw_payload: raw.didl,
        })
    }
}

/// Derive a filesystem-safe name from a title.
///
/// Slashes and control characters become `_`, surrounding whitespace is
/// trimmed. A result that is empty or starts with `.` is replaced by
/// `-id-<id>`, so the name is never empty, hidden, `.` or `..`.
pub fn basename_for(title: &str, id: &str) -> String {
    let cleaned = clean(title.trim());
    if cleaned.is_empty() || cleaned.starts_with('.') {
        format!("{ID_BASENAME_PREFIX}{}", clean(id))
    } else {
        cleaned
    }
}

fn clean(s: &str) -> String {
    s.chars()
        .map(|c| if c == '/' || c.is_control() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(id: &str, title: &str) -> RawObject {
        RawObject {
            id: id.into(),
            parent_id: "0".into(),
            title: title.into(),
            class: "object.item".into(),
            is_container: false,
            resources: Vec::new(),
            didl: String::new(),
        }
    }

    #[test]
    fn plain_title_is_kept() {
        assert_eq!(basename_for("Abbey Road", "12"), "Abbey Road");
        assert_eq!(basename_for("  padded  ", "12"), "padded");
    }

    #[test]
    fn slashes_and_controls_are_replaced() {
        assert_eq!(basename_for("AC/DC", "7"), "AC_DC");
        assert_eq!(basename_for("tab\there", "7"), "tab_here");
    }

    #[test]
    fn blank_title_falls_back_to_id() {
        assert_eq!(basename_for("   ", "42"), "-id-42");
        assert_eq!(basename_for("", "a/b"), "-id-a_b");
    }

    #[test]
    fn dot_leading_title_falls_back_to_id() {
        assert_eq!(basename_for(".hidden", "9"), "-id-9");
        assert_eq!(basename_for("..", "9"), "-id-9");
        assert_eq!(basename_for(" .", "9"), "-id-9");
    }

    #[test]
    fn node_without_id_is_rejected() {
        assert!(CatalogNode::from_raw(raw("", "orphan")).is_none());
        let node = CatalogNode::from_raw(raw("5", "song.mp3")).unwrap();
        assert_eq!(node.basename, "song.mp3");
    }

    #[test]
    fn mime_type_from_protocol_info() {
        let res = Resource {
            uri: "http://h/x".into(),
            protocol_info: "http-get:*:audio/mpeg:*".into(),
            size: None,
        };
        assert_eq!(res.mime_type(), Some("audio/mpeg"));
        let res = Resource {
            protocol_info: "http-get:*:*:*".into(),
            ..res
        };
        assert_eq!(res.mime_type(), None);
    }

    proptest! {
        #[test]
        fn basename_is_always_usable(title in ".*", id in "[a-z0-9/$]{1,12}") {
            let name = basename_for(&title, &id);
            prop_assert!(!name.is_empty());
            prop_assert!(!name.starts_with('.'));
            prop_assert!(!name.contains('/'));
        }
    }
}
