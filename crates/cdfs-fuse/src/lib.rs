//! cdfs-fuse: projects ContentDirectory catalogs onto a read-only path namespace
//!
//! [`PathResolver`] answers stat / readdir / open / readlink for any path in
//! one left-to-right traversal. The FUSE driver (feature `fuse`) forwards
//! kernel requests into it.
//!
//! Linux: fuse3 crate (kernel FUSE)
//! macOS: fuse3 with macFUSE 4.x (feature: macos-fuse)

pub mod content;
pub mod cursor;
pub mod driver;
pub mod media;
pub mod naming;
pub mod query;
pub mod registry;
pub mod resolver;

// Re-export the mount API when the fuse feature is enabled
#[cfg(feature = "fuse")]
pub use driver::{mount, MountConfig};

pub use content::FileContent;
pub use cursor::PathCursor;
pub use media::{DefaultMediaResolver, MediaResolver, MediaVariant, NoFetch, UrlFetcher};
pub use query::{DirSink, Query};
pub use registry::{DeviceRegistry, StaticRegistry};
pub use resolver::{Matched, PathResolver, ResolverOptions};
