// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{CacheError, Result};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(&Self::default_config_path()), false)
    }

    /// Same as [`AppConfig::load`] but reads an explicit config file.
    pub fn load_from(path: &Path, required: bool) -> Result<Self> {
        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            // Load from config file if it exists
            .add_source(File::from(path).required(required))
            // Override with environment variables (GENCACHE_CACHE__JAIL_THRESHOLD=5)
            .add_source(
                Environment::with_prefix("GENCACHE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CacheError::Config(e.to_string()))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| CacheError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if self.store.connect_timeout_ms == 0 {
            return Err(CacheError::Config(
                "store.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.upstream.max_retries == 0 {
            return Err(CacheError::Config(
                "upstream.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gencache")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("cache.ttl_seconds", self.ttl_seconds as usize),
            ("cache.jail_threshold", self.jail_threshold as usize),
            ("cache.jail_ttl_seconds", self.jail_ttl_seconds as usize),
            ("cache.stream_chunk_size", self.stream_chunk_size),
            ("cache.max_key_log_length", self.max_key_log_length),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CacheError::Config(format!("{} must be positive", name)));
            }
        }

        if self.cache_key_prefix.is_empty() || self.jail_key_prefix.is_empty() {
            return Err(CacheError::Config("key prefixes must not be empty".to_string()));
        }
        if self.cache_key_prefix == self.jail_key_prefix {
            return Err(CacheError::Config(
                "cache_key_prefix and jail_key_prefix must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn jail_ttl(&self) -> Duration {
        Duration::from_secs(self.jail_ttl_seconds)
    }
}
