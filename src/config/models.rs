//! Configuration data structures for the lazarus-sw cache worker.
//!
//! This module defines the schema for the application settings: where the
//! proxy listens, which origin it fronts, how the versioned cache storage is
//! laid out, and how requests are classified into caching strategies.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings (host, port).
    #[serde(default)]
    pub server: ServerConfig,

    /// The application server this worker fronts.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Versioned cache storage settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// URL prefixes that select a caching strategy.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Install/activate behaviour.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Background sync settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the built-in HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The IP address or hostname the server should bind to.
    /// Default: `127.0.0.1`
    #[serde(default = "default_host")]
    pub host: String,

    /// The port number the server should listen on.
    /// Default: `8080`
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest request body the proxy will buffer, in bytes.
    /// Default: `50 MiB`
    #[serde(default = "default_body_limit")]
    pub max_body_bytes: usize,
}

/// Settings for the upstream application server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Origin of the application server (scheme, host and port).
    /// Default: `http://127.0.0.1:3000`
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Whole-request timeout in seconds.
    /// Default: `30`
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Connection establishment timeout in seconds.
    /// Default: `5`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

/// Which storage backend holds the cache stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Disk,
    Memory,
}

/// Settings for the versioned cache storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// The version tag naming the current cache store.
    /// Must be bumped whenever cached behaviour or the asset list changes.
    #[serde(default = "default_cache_version")]
    pub version: String,

    /// Storage backend for cache stores.
    /// Default: `disk`
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Root directory of the disk backend.
    /// Default: `~/.lazarus-sw/caches`
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Paths fetched and stored atomically during install.
    #[serde(default = "default_static_assets")]
    pub static_assets: Vec<String>,

    /// Capacity of the write-behind queue.
    /// Default: `256`
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
}

/// URL prefixes recognised by the request router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Network-first prefix.
    /// Default: `/api/`
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Cache-first prefix.
    /// Default: `/static/`
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,

    /// Path of the offline shell served when a page cannot be loaded.
    /// Default: `/`
    #[serde(default = "default_shell_path")]
    pub shell_path: String,
}

/// Install and activation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Activate a freshly installed version immediately instead of waiting.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// Retry a failed install in the background with exponential backoff.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub retry_install: bool,
}

/// Background sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// The tag that triggers note syncing. Other tags are ignored.
    /// Default: `sync-notes`
    #[serde(default = "default_sync_tag")]
    pub tag: String,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default trait implementations linking to custom logic

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_body_limit(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            version: default_cache_version(),
            backend: default_backend(),
            dir: default_cache_dir(),
            static_assets: default_static_assets(),
            write_queue_capacity: default_write_queue_capacity(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            api_prefix: default_api_prefix(),
            static_prefix: default_static_prefix(),
            shell_path: default_shell_path(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            skip_waiting: true,
            retry_install: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: default_sync_tag(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Helper functions for serde defaults and shared constants
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    50 * 1024 * 1024
}

fn default_origin() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

/// Baked in at build time when `LAZARUS_SW_CACHE_VERSION` is set for the
/// build, so a release pipeline can stamp the tag without editing source.
fn default_cache_version() -> String {
    option_env!("LAZARUS_SW_CACHE_VERSION")
        .unwrap_or("lazarus-v1")
        .to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::Disk
}

fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lazarus-sw")
        .join("caches")
}

fn default_static_assets() -> Vec<String> {
    [
        "/",
        "/static/style.css",
        "/static/editorjs.js",
        "/static/editorjs-header.js",
        "/static/editorjs-list.js",
        "/static/editorjs-quote.js",
        "/static/editorjs-marker.js",
        "/static/editorjs-inline-code.js",
        "/static/manifest.json",
        "/static/icon-192.png",
        "/static/icon-512.png",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_write_queue_capacity() -> usize {
    256
}

fn default_api_prefix() -> String {
    "/api/".to_string()
}

fn default_static_prefix() -> String {
    "/static/".to_string()
}

fn default_shell_path() -> String {
    "/".to_string()
}

fn default_sync_tag() -> String {
    "sync-notes".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
