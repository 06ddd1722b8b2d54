use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CdfsError, CdfsResult};

/// Top-level configuration (loaded from cdfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CdfsConfig {
    pub daemon: DaemonConfig,
    pub cache: CacheConfig,
    pub fs: FsConfig,
    pub http: HttpConfig,
    /// Offline devices backed by catalog snapshots
    pub devices: Vec<DeviceConfig>,
}

impl CdfsConfig {
    /// Parse a configuration document.
    pub fn parse(content: &str) -> CdfsResult<Self> {
        toml::from_str(content).map_err(|e| CdfsError::Config(e.to_string()))
    }

    /// Load the configuration at `path`, falling back to defaults when the
    /// file does not exist. Callers report the fallback themselves, since
    /// this usually runs before logging is set up.
    pub fn load(path: &Path) -> CdfsResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| CdfsError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Initial capacity of each device's browse cache; 0 disables caching
    pub size: usize,
    /// Seconds before a cached listing must be refetched; 0 = never ages
    pub max_age_secs: u64,
}

impl CacheConfig {
    pub fn enabled(&self) -> bool {
        self.size > 0
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Items above this size (or of unknown size) are exposed as playlists
    pub playlist_threshold_mb: u64,
    /// List the `.metadata` directory in browse listings
    pub show_metadata: bool,
    /// Kernel attribute/entry cache TTL in seconds
    pub attr_ttl_secs: u64,
}

impl FsConfig {
    pub fn playlist_threshold_bytes(&self) -> u64 {
        self.playlist_threshold_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout for a single ranged media read
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Friendly name shown under the mount root
    pub name: String,
    /// JSON catalog snapshot serving this device's ContentDirectory
    pub snapshot: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            max_age_secs: 300,
        }
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            playlist_threshold_mb: 2048,
            show_metadata: false,
            attr_ttl_secs: 5,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
log_level = "debug"
log_format = "json"

[cache]
size = 64
max_age_secs = 10

[fs]
playlist_threshold_mb = 100
show_metadata = true
attr_ttl_secs = 1

[http]
timeout_secs = 5

[[devices]]
name = "Living Room"
snapshot = "/var/lib/cdfs/living-room.json"

[[devices]]
name = "Attic NAS"
snapshot = "/var/lib/cdfs/attic.json"
"#;
        let config = CdfsConfig::parse(toml_str).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.daemon.log_format, "json");
        assert_eq!(config.cache.size, 64);
        assert_eq!(config.cache.max_age(), Duration::from_secs(10));
        assert_eq!(config.fs.playlist_threshold_bytes(), 100 * 1024 * 1024);
        assert!(config.fs.show_metadata);
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[1].name, "Attic NAS");
        assert_eq!(
            config.devices[0].snapshot,
            PathBuf::from("/var/lib/cdfs/living-room.json")
        );
    }

    #[test]
    fn test_parse_defaults() {
        let config = CdfsConfig::parse("").unwrap();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.log_format, "text");
        assert!(config.cache.enabled());
        assert_eq!(config.cache.max_age_secs, 300);
        assert_eq!(config.fs.playlist_threshold_mb, 2048);
        assert!(!config.fs.show_metadata);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_cache_disabled_by_zero_size() {
        let config = CdfsConfig::parse("[cache]\nsize = 0\n").unwrap();
        assert!(!config.cache.enabled());
        // Untouched fields keep their defaults
        assert_eq!(config.cache.max_age_secs, 300);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = CdfsConfig::parse("[cache]\nsize = \"lots\"\n").unwrap_err();
        assert!(matches!(err, CdfsError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CdfsConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.cache.size, 1024);
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdfs.toml");
        std::fs::write(&path, "[fs]\nshow_metadata = true\n").unwrap();
        let config = CdfsConfig::load(&path).unwrap();
        assert!(config.fs.show_metadata);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CdfsConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = CdfsConfig::parse(&toml_str).unwrap();

        assert_eq!(config.cache.size, parsed.cache.size);
        assert_eq!(config.fs.attr_ttl_secs, parsed.fs.attr_ttl_secs);
    }
}
