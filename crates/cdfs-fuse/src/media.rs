//! Media collaborators: choosing a resource for an item and reading it.

use std::io;

use cdfs_catalog::{CatalogNode, Resource};

/// The resource chosen to represent an item as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaVariant {
    pub uri: String,
    /// File extension without the dot, possibly empty
    pub extension: String,
    /// The resource is itself a playlist rather than media
    pub is_playlist: bool,
    pub known_size: Option<u64>,
}

pub trait MediaResolver: Send + Sync {
    /// Pick the resource to expose for `node`, or `None` if it has nothing
    /// playable.
    fn preferred_variant(&self, node: &CatalogNode) -> Option<MediaVariant>;

    /// Text of the `.m3u` file generated for a variant.
    fn playlist_content(&self, variant: &MediaVariant) -> String;
}

/// Ranged reads of remote media.
pub trait UrlFetcher: Send + Sync {
    fn fetch_range(&self, uri: &str, offset: u64, len: u64) -> io::Result<Vec<u8>>;
}

/// A fetcher for setups that never read remote media.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFetch;

impl UrlFetcher for NoFetch {
    fn fetch_range(&self, uri: &str, _offset: u64, _len: u64) -> io::Result<Vec<u8>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("remote reads disabled: {uri}"),
        ))
    }
}

/// Picks the first `http-get` resource and derives the extension from its
/// MIME type, falling back to the URI's suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMediaResolver;

const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("audio/mpeg", "mp3"),
    ("audio/mp4", "m4a"),
    ("audio/x-flac", "flac"),
    ("audio/flac", "flac"),
    ("audio/ogg", "ogg"),
    ("audio/x-ms-wma", "wma"),
    ("audio/wav", "wav"),
    ("audio/x-wav", "wav"),
    ("audio/L16", "pcm"),
    ("audio/x-mpegurl", "m3u"),
    ("video/mp4", "mp4"),
    ("video/mpeg", "mpg"),
    ("video/x-matroska", "mkv"),
    ("video/x-msvideo", "avi"),
    ("video/x-ms-wmv", "wmv"),
    ("video/quicktime", "mov"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
];

impl DefaultMediaResolver {
    fn extension_for(res: &Resource) -> String {
        if let Some(mime) = res.mime_type() {
            if let Some((_, ext)) = MIME_EXTENSIONS
                .iter()
                .find(|(m, _)| m.eq_ignore_ascii_case(mime))
            {
                return (*ext).to_string();
            }
        }
        uri_extension(&res.uri).unwrap_or_default()
    }
}

impl MediaResolver for DefaultMediaResolver {
    fn preferred_variant(&self, node: &CatalogNode) -> Option<MediaVariant> {
        let res = node
            .resources
            .iter()
            .find(|r| r.protocol_info.starts_with("http-get:"))
            .or_else(|| node.resources.first())?;
        let extension = Self::extension_for(res);
        Some(MediaVariant {
            uri: res.uri.clone(),
            is_playlist: matches!(extension.as_str(), "m3u" | "pls"),
            extension,
            known_size: res.size,
        })
    }

    fn playlist_content(&self, variant: &MediaVariant) -> String {
        format!("{}\n", variant.uri)
    }
}

/// Extension of the last path segment of a URI, ignoring query and fragment.
fn uri_extension(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
