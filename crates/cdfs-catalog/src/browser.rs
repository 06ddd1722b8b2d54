//! Cached, paginated browsing on top of a [`CatalogService`].
//!
//! ```text
//! browse_or_search(id, criteria)
//!   ├─ lock cache → get_or_create(key) → unlock
//!   ├─ hit with a value?  → share the cached Arc<ChildrenSet>
//!   └─ otherwise          → fetch all pages (no lock held)
//!                           lock cache → store → unlock
//! ```
//!
//! Two callers missing the same key at the same time both fetch; the later
//! store wins the slot. Each still returns the set it fetched.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::children::{ChildrenSet, ChildrenSetBuilder};
use crate::node::CatalogNode;
use crate::service::{BrowseFlag, BrowsePage, CatalogService, Criteria, RemoteError};
use crate::ttl_cache::{CacheError, CacheStats, SlotStatus, TtlCache};

/// Extra requests issued when the server truncates a "return all" answer.
pub const MAX_PAGE_RETRIES: usize = 2;

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("browse of {container_id:?} ({criteria}) failed")]
    Failed {
        container_id: String,
        criteria: String,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// The outcome of one browse call. Holds its own reference to the children
/// set; dropping it releases that reference.
#[derive(Debug, Clone)]
pub struct BrowseResult {
    pub children: Arc<ChildrenSet>,
    /// Whether the set came out of the cache
    pub cached: bool,
}

impl BrowseResult {
    pub fn nb_matched(&self) -> usize {
        self.children.len()
    }

    pub fn total_matches(&self) -> u32 {
        self.children.total_matches()
    }
}

pub struct CatalogBrowser {
    name: String,
    service: Arc<dyn CatalogService>,
    cache: Option<Mutex<TtlCache<Arc<ChildrenSet>>>>,
}

impl CatalogBrowser {
    /// Create a browser whose listings are cached for `max_age`
    /// (`Duration::ZERO` = never aged). A `cache_size` of 0 disables caching.
    pub fn new(
        name: impl Into<String>,
        service: Arc<dyn CatalogService>,
        cache_size: usize,
        max_age: Duration,
    ) -> Result<Self, CacheError> {
        let name = name.into();
        let cache = if cache_size == 0 {
            None
        } else {
            let cache_name = name.clone();
            let cache = TtlCache::new(name.clone(), cache_size, max_age)?.with_expire_hook(
                move |key, children: Arc<ChildrenSet>| {
                    debug!(
                        cache = %cache_name,
                        key,
                        readers = Arc::strong_count(&children) - 1,
                        "releasing expired children set"
                    );
                },
            );
            Some(Mutex::new(cache))
        };
        Ok(CatalogBrowser {
            name,
            service,
            cache,
        })
    }

    /// A browser that fetches on every call.
    pub fn uncached(name: impl Into<String>, service: Arc<dyn CatalogService>) -> Self {
        CatalogBrowser {
            name: name.into(),
            service,
            cache: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &Arc<dyn CatalogService> {
        &self.service
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| lock(cache).stats())
    }

    pub fn browse(&self, container_id: &str) -> Result<BrowseResult, BrowseError> {
        self.browse_or_search(container_id, &Criteria::DirectChildren)
    }

    /// Return the children of `container_id` under `criteria`, from cache
    /// when a live entry exists, from the service otherwise.
    pub fn browse_or_search(
        &self,
        container_id: &str,
        criteria: &Criteria,
    ) -> Result<BrowseResult, BrowseError> {
        let Some(cache) = &self.cache else {
            let children = Arc::new(self.fetch_all(container_id, criteria)?);
            return Ok(BrowseResult {
                children,
                cached: false,
            });
        };

        let key = criteria.cache_key(container_id);
        {
            let mut guard = lock(cache);
            let slot = guard.get_or_create(&key)?;
            if slot.status == SlotStatus::Hit {
                if let Some(children) = slot.value.as_ref() {
                    debug!(browser = %self.name, container = %container_id, %criteria, "cache hit");
                    return Ok(BrowseResult {
                        children: Arc::clone(children),
                        cached: true,
                    });
                }
            }
            debug!(browser = %self.name, container = %container_id, %criteria, status = ?slot.status, "cache miss");
        }

        let children = match self.fetch_all(container_id, criteria) {
            Ok(set) => Arc::new(set),
            Err(e) => {
                // Drop our empty slot, but keep a set stored meanwhile by
                // another caller for the same key
                lock(cache).remove_unpopulated(&key);
                return Err(e);
            }
        };

        lock(cache).store(&key, Arc::clone(&children))?;
        Ok(BrowseResult {
            children,
            cached: false,
        })
    }

    /// Fetch every page of a listing.
    ///
    /// Asks for everything at once; if the server answers with fewer objects
    /// than it reports in total, asks again for the remainder up to
    /// [`MAX_PAGE_RETRIES`] times, stopping early on an empty answer. A
    /// remaining shortfall is logged and tolerated.
    fn fetch_all(&self, container_id: &str, criteria: &Criteria) -> Result<ChildrenSet, BrowseError> {
        let mut builder = ChildrenSetBuilder::new();

        let first = self.fetch_page(container_id, criteria, 0, 0)?;
        let total = first.total_matches;
        let mut accumulated = first.number_returned;
        builder.set_total_matches(total);
        self.append(&mut builder, first, container_id);

        let mut retries = 0;
        while accumulated < total && retries < MAX_PAGE_RETRIES {
            retries += 1;
            let missing = total - accumulated;
            warn!(
                browser = %self.name,
                container = %container_id,
                %criteria,
                total,
                accumulated,
                retry = retries,
                "incomplete browse answer, requesting remainder"
            );
            let page = self.fetch_page(container_id, criteria, accumulated, missing)?;
            if page.number_returned == 0 || page.objects.is_empty() {
                break;
            }
            accumulated = accumulated.saturating_add(page.number_returned);
            self.append(&mut builder, page, container_id);
        }

        if accumulated < total {
            warn!(
                browser = %self.name,
                container = %container_id,
                %criteria,
                total,
                accumulated,
                "server never returned all reported objects"
            );
        }

        let set = builder.build();
        debug!(
            browser = %self.name,
            container = %container_id,
            %criteria,
            containers = set.nb_containers(),
            items = set.nb_items(),
            total,
            "fetched children"
        );
        Ok(set)
    }

    fn fetch_page(
        &self,
        container_id: &str,
        criteria: &Criteria,
        start: u32,
        count: u32,
    ) -> Result<BrowsePage, BrowseError> {
        let result = match criteria {
            Criteria::DirectChildren => {
                self.service
                    .browse(container_id, BrowseFlag::DirectChildren, start, count)
            }
            Criteria::Metadata => self
                .service
                .browse(container_id, BrowseFlag::Metadata, start, count),
            Criteria::Search(expr) => self.service.search(container_id, expr, start, count),
        };
        result.map_err(|source| {
            warn!(
                browser = %self.name,
                container = %container_id,
                %criteria,
                start,
                count,
                "browse failed: {source}"
            );
            BrowseError::Failed {
                container_id: container_id.to_string(),
                criteria: criteria.to_string(),
                source,
            }
        })
    }

    fn append(&self, builder: &mut ChildrenSetBuilder, page: BrowsePage, container_id: &str) {
        let parsed_before = builder.len();
        let returned = page.number_returned;
        for raw in page.objects {
            match CatalogNode::from_raw(raw) {
                Some(node) => builder.push(node),
                None => warn!(browser = %self.name, container = %container_id, "skipping object without id"),
            }
        }
        let parsed = builder.len() - parsed_before;
        if parsed != returned as usize {
            warn!(
                browser = %self.name,
                container = %container_id,
                returned,
                parsed,
                "object count differs from NumberReturned"
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RawObject;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    /// Serves a fixed listing of `n` items per container and counts calls.
    struct Counting {
        calls: AtomicUsize,
        n: usize,
        fail: bool,
    }

    impl Counting {
        fn new(n: usize) -> Arc<Self> {
            Arc::new(Counting {
                calls: AtomicUsize::new(0),
                n,
                fail: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CatalogService for Counting {
        fn browse(&self, id: &str, _: BrowseFlag, _: u32, _: u32) -> Result<BrowsePage, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RemoteError::Unreachable("connection refused".into()));
            }
            let objects: Vec<RawObject> = (0..self.n)
                .map(|i| RawObject {
                    id: format!("{id}/{i}"),
                    parent_id: id.into(),
                    title: format!("t{i}"),
                    class: "object.item".into(),
                    is_container: false,
                    resources: Vec::new(),
                    didl: String::new(),
                })
                .collect();
            Ok(BrowsePage {
                total_matches: self.n as u32,
                number_returned: self.n as u32,
                objects,
            })
        }

        fn search(&self, id: &str, _: &str, s: u32, c: u32) -> Result<BrowsePage, RemoteError> {
            self.browse(id, BrowseFlag::DirectChildren, s, c)
        }

        fn search_capabilities(&self) -> Result<String, RemoteError> {
            Ok(String::new())
        }
    }

    #[test]
    fn second_browse_is_served_from_cache() {
        let service = Counting::new(3);
        let browser = CatalogBrowser::new("dev", service.clone(), 16, Duration::from_secs(60)).unwrap();

        let first = browser.browse("0").unwrap();
        let second = browser.browse("0").unwrap();

        assert_eq!(service.calls(), 1);
        assert!(!first.cached);
        assert!(second.cached);
        assert!(Arc::ptr_eq(&first.children, &second.children));
        assert_eq!(second.nb_matched(), 3);
    }

    #[test]
    fn criteria_variants_use_separate_slots() {
        let service = Counting::new(1);
        let browser = CatalogBrowser::new("dev", service.clone(), 16, Duration::ZERO).unwrap();

        browser.browse_or_search("0", &Criteria::DirectChildren).unwrap();
        browser.browse_or_search("0", &Criteria::Metadata).unwrap();
        browser
            .browse_or_search("0", &Criteria::Search("*".into()))
            .unwrap();
        browser.browse_or_search("0", &Criteria::Metadata).unwrap();

        assert_eq!(service.calls(), 3);
        assert_eq!(browser.cache_stats().unwrap().live, 3);
    }

    #[test]
    fn search_does_not_reuse_metadata_slot() {
        let service = Counting::new(1);
        let browser = CatalogBrowser::new("dev", service.clone(), 16, Duration::ZERO).unwrap();

        browser.browse_or_search("0", &Criteria::Metadata).unwrap();
        let search = browser
            .browse_or_search("0", &Criteria::Search(crate::service::METADATA.into()))
            .unwrap();

        assert!(!search.cached);
        assert_eq!(service.calls(), 2);
    }

    #[test]
    fn uncached_browser_always_fetches() {
        let service = Counting::new(2);
        let browser = CatalogBrowser::new("dev", service.clone(), 0, Duration::from_secs(60)).unwrap();

        let a = browser.browse("0").unwrap();
        let b = browser.browse("0").unwrap();

        assert_eq!(service.calls(), 2);
        assert!(!Arc::ptr_eq(&a.children, &b.children));
        assert_eq!(Arc::strong_count(&a.children), 1);
        assert!(browser.cache_stats().is_none());
    }

    #[test]
    fn caller_reference_outlives_cache_entry() {
        let service = Counting::new(2);
        let browser = CatalogBrowser::new("dev", service.clone(), 16, Duration::from_secs(60)).unwrap();

        let held = browser.browse("0").unwrap();
        assert_eq!(Arc::strong_count(&held.children), 2);

        if let Some(cache) = &browser.cache {
            lock(cache).remove("0");
        }
        assert_eq!(Arc::strong_count(&held.children), 1);
        assert_eq!(held.children.len(), 2);
    }

    #[test]
    fn expired_entry_is_refetched_once() {
        let service = Counting::new(1);
        let browser =
            CatalogBrowser::new("dev", service.clone(), 16, Duration::from_millis(50)).unwrap();

        browser.browse("0").unwrap();
        browser.browse("0").unwrap();
        assert_eq!(service.calls(), 1);

        std::thread::sleep(Duration::from_millis(80));
        browser.browse("0").unwrap();
        browser.browse("0").unwrap();
        assert_eq!(service.calls(), 2);
    }

    #[test]
    fn failure_is_reported_and_not_cached() {
        let service = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            n: 0,
            fail: true,
        });
        let browser = CatalogBrowser::new("dev", service.clone(), 16, Duration::from_secs(60)).unwrap();

        let err = browser.browse("7").unwrap_err();
        match err {
            BrowseError::Failed { container_id, criteria, .. } => {
                assert_eq!(container_id, "7");
                assert_eq!(criteria, "BrowseDirectChildren");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(browser.browse("7").is_err());
        assert_eq!(service.calls(), 2);
        assert_eq!(browser.cache_stats().unwrap().live, 0);
    }

    /// Fails its first call, after letting a second caller browse the same
    /// container successfully through the shared browser.
    struct Overtaken {
        inner: Arc<Counting>,
        browser: OnceLock<Arc<CatalogBrowser>>,
    }

    impl CatalogService for Overtaken {
        fn browse(&self, id: &str, flag: BrowseFlag, s: u32, c: u32) -> Result<BrowsePage, RemoteError> {
            if self.inner.calls() == 0 {
                self.inner.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(browser) = self.browser.get() {
                    browser.browse(id).map_err(|e| RemoteError::Unreachable(e.to_string()))?;
                }
                return Err(RemoteError::Unreachable("connection reset".into()));
            }
            self.inner.browse(id, flag, s, c)
        }

        fn search(&self, id: &str, _: &str, s: u32, c: u32) -> Result<BrowsePage, RemoteError> {
            self.browse(id, BrowseFlag::DirectChildren, s, c)
        }

        fn search_capabilities(&self) -> Result<String, RemoteError> {
            Ok(String::new())
        }
    }

    #[test]
    fn failure_keeps_set_stored_by_concurrent_caller() {
        let service = Arc::new(Overtaken {
            inner: Counting::new(2),
            browser: OnceLock::new(),
        });
        let browser = Arc::new(
            CatalogBrowser::new("dev", service.clone(), 16, Duration::from_secs(60)).unwrap(),
        );
        assert!(service.browser.set(Arc::clone(&browser)).is_ok());

        assert!(browser.browse("0").is_err());
        assert_eq!(service.inner.calls(), 2);

        let again = browser.browse("0").unwrap();
        assert!(again.cached);
        assert_eq!(again.nb_matched(), 2);
        assert_eq!(service.inner.calls(), 2);
    }
}
