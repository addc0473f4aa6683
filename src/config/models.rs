//! Configuration data structures for gencache.
//!
//! This module defines the schema for the application settings: the HTTP
//! server, the backing key-value store, the upstream generation endpoint and
//! the cache behaviour itself.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::{Deserialize, Serialize};

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings (host, port).
    #[serde(default)]
    pub server: ServerConfig,

    /// Backing key-value store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Upstream generation endpoint settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Cache, jail and metrics behaviour.
    #[serde(default)]
    pub cache: CacheSettings,

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
}

/// Which key-value backend holds cache and jail records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Settings for the backing key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend type (`redis` or `memory`).
    /// Default: `redis`
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Connection URL for the Redis-compatible server.
    /// Default: `redis://127.0.0.1:6379`
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Upper bound on opening the Redis connection, in milliseconds.
    /// Default: 500
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long to fail fast after a failed connect before trying again,
    /// in milliseconds.
    /// Default: 5000
    #[serde(default = "default_reconnect_cooldown_ms")]
    pub reconnect_cooldown_ms: u64,
}

/// Settings for the upstream generation API that gets cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL exposing `/generate` and `/stream`.
    /// Default: `http://127.0.0.1:9000`
    #[serde(default = "default_upstream_url")]
    pub base_url: String,

    /// Optional bearer token sent to the upstream.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier used when a request does not name one.
    /// Default: `default`
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Request timeout in seconds.
    /// Default: `300` (5 minutes)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum number of attempts for non-streaming calls.
    /// Default: `3`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Cache, jail and metrics behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Lifetime of a cached response in seconds.
    /// Default: `86400` (24 hours)
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,

    /// Probationary occurrences needed before a jailed response is promoted.
    /// Default: `3`
    #[serde(default = "default_jail_threshold")]
    pub jail_threshold: u32,

    /// Lifetime of a jail record in seconds.
    /// Default: `86400` (24 hours)
    #[serde(default = "default_ttl")]
    pub jail_ttl_seconds: u64,

    /// Characters per delta when replaying a cached response as a stream.
    /// Default: `5`
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,

    /// Whether per-call cache events are logged at debug level.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enable_logging: bool,

    /// Whether the metrics collector records anything.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Namespace for cache entry keys.
    /// Default: `ai-cache`
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,

    /// Namespace for jail record keys.
    /// Default: `ai-jail`
    #[serde(default = "default_jail_key_prefix")]
    pub jail_key_prefix: String,

    /// Number of key characters kept when a key is written to the logs.
    /// Default: `20`
    #[serde(default = "default_max_key_log_length")]
    pub max_key_log_length: usize,
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
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_cooldown_ms: default_reconnect_cooldown_ms(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_url(),
            api_key: None,
            default_model: default_model(),
            timeout_seconds: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            jail_threshold: default_jail_threshold(),
            jail_ttl_seconds: default_ttl(),
            stream_chunk_size: default_stream_chunk_size(),
            enable_logging: true,
            enable_metrics: true,
            cache_key_prefix: default_cache_key_prefix(),
            jail_key_prefix: default_jail_key_prefix(),
            max_key_log_length: default_max_key_log_length(),
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

fn default_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_reconnect_cooldown_ms() -> u64 {
    5000
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_jail_threshold() -> u32 {
    3
}

fn default_stream_chunk_size() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_cache_key_prefix() -> String {
    "ai-cache".to_string()
}

fn default_jail_key_prefix() -> String {
    "ai-jail".to_string()
}

fn default_max_key_log_length() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
