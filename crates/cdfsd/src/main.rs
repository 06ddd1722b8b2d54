//! cdfs: browse UPnP ContentDirectory catalogs as a filesystem
//!
//! Usage:
//!   cdfs [--config /etc/cdfs/config.toml] <command>
//!
//! Commands:
//!   ls <path>          - list a directory of the namespace
//!   stat <path>        - show type, size and link count
//!   cat <path>         - print a file (media is fetched with ranged reads)
//!   readlink <path>    - print a symlink's target
//!   cache              - print every device's cache statistics
//!   mount <mountpoint> - serve the namespace over FUSE (feature: fuse)

mod http;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cdfs_catalog::{CatalogBrowser, SnapshotCatalog};
use cdfs_core::config::CdfsConfig;
use cdfs_core::{DirEntry, EntryKind};
use cdfs_fuse::{
    DefaultMediaResolver, PathResolver, Query, ResolverOptions, StaticRegistry, UrlFetcher,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use crate::http::UreqFetcher;

/// Bytes per read when copying a file to stdout
const CAT_CHUNK: u32 = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "cdfs", version, about = "ContentDirectory filesystem")]
struct Cli {
    /// Path to cdfs.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CDFS_CONFIG",
        default_value = "/etc/cdfs/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "CDFS_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "CDFS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a directory
    Ls { path: String },

    /// Show what a path resolves to
    Stat { path: String },

    /// Print a file's content
    Cat { path: String },

    /// Print a symlink's target
    Readlink { path: String },

    /// Print per-device cache statistics
    Cache,

    /// Mount the namespace and serve it until unmounted
    Mount {
        mountpoint: PathBuf,
        /// Let other users access the mount (needs user_allow_other)
        #[arg(long)]
        allow_other: bool,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CdfsConfig::load(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.daemon.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        devices = config.devices.len(),
        "cdfs starting"
    );
    if let Some(notice) = missing_config_notice(&cli.config) {
        warn!("{notice}");
    }

    let resolver = Arc::new(build_resolver(&config)?);
    let fetcher: Arc<dyn UrlFetcher> =
        Arc::new(UreqFetcher::new(Duration::from_secs(config.http.timeout_secs)));

    match cli.command {
        Commands::Ls { path } => ls(&resolver, &path),
        Commands::Stat { path } => stat(&resolver, &path),
        Commands::Cat { path } => cat(&resolver, fetcher.as_ref(), &path),
        Commands::Readlink { path } => readlink(&resolver, &path),
        Commands::Cache => cat(&resolver, fetcher.as_ref(), "/.debug/cache"),
        Commands::Mount {
            mountpoint,
            allow_other,
        } => mount(resolver, fetcher, &config, mountpoint, allow_other).await,
    }
}

/// The warning logged when the config file is absent and defaults apply.
fn missing_config_notice(path: &Path) -> Option<String> {
    (!path.exists()).then(|| format!("config file not found: {}  (using defaults)", path.display()))
}

/// Register every configured device and build the resolver over them.
fn build_resolver(config: &CdfsConfig) -> Result<PathResolver> {
    let registry = StaticRegistry::new();
    for device in &config.devices {
        let snapshot = SnapshotCatalog::load(&device.snapshot)
            .with_context(|| format!("loading device {:?}", device.name))?;
        let browser = CatalogBrowser::new(
            device.name.as_str(),
            Arc::new(snapshot),
            config.cache.size,
            config.cache.max_age(),
        )
        .with_context(|| format!("creating cache for device {:?}", device.name))?;
        let location = device.snapshot.display().to_string();
        let name = registry.add(&device.name, &location, Arc::new(browser));
        info!(device = %name, snapshot = %location, "device registered");
    }

    let options = ResolverOptions {
        playlist_threshold: config.fs.playlist_threshold_bytes(),
        show_metadata: config.fs.show_metadata,
    };
    Ok(PathResolver::new(
        Arc::new(registry),
        Arc::new(DefaultMediaResolver),
        options,
    ))
}

fn ls(resolver: &PathResolver, path: &str) -> Result<()> {
    let mut entries: Vec<DirEntry> = Vec::new();
    let mut query = Query::new().with_listing(&mut entries);
    resolver
        .resolve(path, &mut query)
        .with_context(|| format!("ls {path}"))?;
    let mut out = std::io::stdout().lock();
    for entry in entries {
        writeln!(out, "{} {}", kind_char(entry.kind), entry.name)?;
    }
    Ok(())
}

fn stat(resolver: &PathResolver, path: &str) -> Result<()> {
    let mut query = Query::new().with_stat();
    resolver
        .resolve(path, &mut query)
        .with_context(|| format!("stat {path}"))?;
    if let Some(stat) = query.stat() {
        println!(
            "type: {:?}\nsize: {}\nlinks: {}",
            stat.kind, stat.size, stat.nlink
        );
    }
    Ok(())
}

fn cat(resolver: &PathResolver, fetcher: &dyn UrlFetcher, path: &str) -> Result<()> {
    let mut query = Query::new().with_content();
    resolver
        .resolve(path, &mut query)
        .with_context(|| format!("cat {path}"))?;
    let Some(content) = query.take_content() else {
        return Ok(());
    };

    let mut out = std::io::stdout().lock();
    let mut offset = 0u64;
    loop {
        let chunk = content
            .read_at(offset, CAT_CHUNK, fetcher)
            .with_context(|| format!("reading {path} at {offset}"))?;
        if chunk.is_empty() {
            break;
        }
        offset += chunk.len() as u64;
        out.write_all(&chunk)?;
    }
    out.flush()?;
    Ok(())
}

fn readlink(resolver: &PathResolver, path: &str) -> Result<()> {
    let mut query = Query::new().with_link_target();
    resolver
        .resolve(path, &mut query)
        .with_context(|| format!("readlink {path}"))?;
    if let Some(target) = query.link_target() {
        println!("{target}");
    }
    Ok(())
}

#[cfg(feature = "fuse")]
async fn mount(
    resolver: Arc<PathResolver>,
    fetcher: Arc<dyn UrlFetcher>,
    config: &CdfsConfig,
    mountpoint: PathBuf,
    allow_other: bool,
) -> Result<()> {
    cdfs_fuse::mount(cdfs_fuse::MountConfig {
        resolver,
        fetcher,
        mountpoint: mountpoint.clone(),
        attr_ttl_secs: config.fs.attr_ttl_secs,
        allow_other,
    })
    .await
    .with_context(|| format!("mounting {}", mountpoint.display()))
}

#[cfg(not(feature = "fuse"))]
async fn mount(
    _resolver: Arc<PathResolver>,
    _fetcher: Arc<dyn UrlFetcher>,
    _config: &CdfsConfig,
    _mountpoint: PathBuf,
    _allow_other: bool,
) -> Result<()> {
    anyhow::bail!("mount requires the fuse feature: cargo build --features fuse")
}

fn kind_char(kind: EntryKind) -> char {
    match kind {
        EntryKind::Directory => 'd',
        EntryKind::File => '-',
        EntryKind::Symlink => 'l',
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so `cat` output stays clean
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
