//! Device registry: which devices appear at the mount root.

use std::sync::{Arc, PoisonError, RwLock};

use cdfs_catalog::node::basename_for;
use cdfs_catalog::CatalogBrowser;

/// Root-level names owned by the resolver itself; `.debug` is covered by the
/// no-leading-dot rule of device names.
pub const RESERVED_ROOT_NAMES: &[&str] = &["devices"];

/// Source of the devices shown under the mount root.
///
/// Names must already be filesystem-safe and unique; they are matched as
/// literal path components.
pub trait DeviceRegistry: Send + Sync {
    /// Device names in display order.
    fn device_names(&self) -> Vec<String>;

    /// Human-readable status of one device, `None` if unknown.
    fn status_text(&self, name: &str) -> Option<String>;

    /// The catalog browser of one device, `None` if unknown.
    fn browser(&self, name: &str) -> Option<Arc<CatalogBrowser>>;
}

struct Device {
    name: String,
    friendly_name: String,
    location: String,
    browser: Arc<CatalogBrowser>,
}

/// A registry populated explicitly, e.g. from configuration.
#[derive(Default)]
pub struct StaticRegistry {
    devices: RwLock<Vec<Device>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and return the name it is exposed under.
    ///
    /// The friendly name is made filesystem-safe; clashes with an existing
    /// device or a reserved root name get a `(2)`, `(3)`, ... suffix.
    pub fn add(
        &self,
        friendly_name: &str,
        location: &str,
        browser: Arc<CatalogBrowser>,
    ) -> String {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let base = basename_for(friendly_name, browser.name());
        let mut name = base.clone();
        let mut n = 2;
        while RESERVED_ROOT_NAMES.contains(&name.as_str()) || devices.iter().any(|d| d.name == name) {
            name = format!("{base}({n})");
            n += 1;
        }
        devices.push(Device {
            name: name.clone(),
            friendly_name: friendly_name.to_string(),
            location: location.to_string(),
            browser,
        });
        name
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let before = devices.len();
        devices.retain(|d| d.name != name);
        devices.len() != before
    }
}

impl DeviceRegistry for StaticRegistry {
    fn device_names(&self) -> Vec<String> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.iter().map(|d| d.name.clone()).collect()
    }

    fn status_text(&self, name: &str) -> Option<String> {
        let (mut text, browser) = {
            let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
            let device = devices.iter().find(|d| d.name == name)?;
            let text = format!(
                "name: {}\nfriendly_name: {}\nlocation: {}\n",
                device.name, device.friendly_name, device.location
            );
            (text, Arc::clone(&device.browser))
        };
        // The capabilities query may hit the network: keep it outside the lock
        match browser.service().search_capabilities() {
            Ok(caps) if !caps.is_empty() => text.push_str(&format!("search_capabilities: {caps}\n")),
            Ok(_) => text.push_str("search_capabilities: none\n"),
            Err(e) => text.push_str(&format!("search_capabilities: unavailable ({e})\n")),
        }
        Some(text)
    }

    fn browser(&self, name: &str) -> Option<Arc<CatalogBrowser>> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices
            .iter()
            .find(|d| d.name == name)
            .map(|d| Arc::clone(&d.browser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdfs_catalog::SnapshotCatalog;

    fn browser(name: &str) -> Arc<CatalogBrowser> {
        let snapshot = SnapshotCatalog::from_json(
            r#"{"search_capabilities":"dc:title","objects":[{"id":"0","container":true}]}"#,
        )
        .unwrap();
        Arc::new(CatalogBrowser::uncached(name, Arc::new(snapshot)))
    }

    #[test]
    fn names_are_sanitized_and_unique() {
        let registry = StaticRegistry::new();
        assert_eq!(registry.add("Media/Server", "local", browser("a")), "Media_Server");
        assert_eq!(registry.add("Media/Server", "local", browser("b")), "Media_Server(2)");
        assert_eq!(registry.add("  ", "local", browser("c")), "-id-c");
        assert_eq!(registry.add("devices", "local", browser("d")), "devices(2)");
        assert_eq!(
            registry.device_names(),
            ["Media_Server", "Media_Server(2)", "-id-c", "devices(2)"]
        );
    }

    #[test]
    fn status_and_removal() {
        let registry = StaticRegistry::new();
        let name = registry.add("Den", "file:///den.json", browser("den"));

        let status = registry.status_text(&name).unwrap();
        assert!(status.contains("friendly_name: Den"));
        assert!(status.contains("location: file:///den.json"));
        assert!(status.contains("search_capabilities: dc:title"));

        assert!(registry.browser(&name).is_some());
        assert!(registry.remove(&name));
        assert!(registry.status_text(&name).is_none());
        assert!(!registry.remove(&name));
    }
}
