//! cdfs-catalog: cached, paginated browsing of a remote ContentDirectory
//!
//! Layers, leaf first:
//! - [`TtlCache`]: string-keyed slots with TTL expiry and amortized sweeping
//! - [`CatalogService`]: the remote "browse / search a container" primitive
//! - [`CatalogBrowser`]: pagination retry + caching of shared [`ChildrenSet`]s

pub mod browser;
pub mod children;
pub mod node;
pub mod service;
pub mod snapshot;
pub mod ttl_cache;

pub use browser::{BrowseError, BrowseResult, CatalogBrowser};
pub use children::{ChildrenSet, ChildrenSetBuilder};
pub use node::{CatalogNode, Resource};
pub use service::{BrowseFlag, BrowsePage, CatalogService, Criteria, RawObject, RemoteError};
pub use snapshot::{SnapshotCatalog, SnapshotError};
pub use ttl_cache::{CacheError, CacheStats, Slot, SlotStatus, TtlCache};
