// Cache manager - lookup, persistence and the jail promotion protocol
// Author: kelexine (https://github.com/kelexine)

use super::classify::Classification;
use super::key::{truncate_for_log, CacheKey, KeyDeriver};
use super::models::{CacheEntry, CacheOutcome, JailEntry};
use super::store::KvStore;
use crate::config::CacheSettings;
use crate::error::{CacheError, Result};
use crate::metrics::MetricsCollector;
use crate::models::{GenerateRequest, GenerateResponse};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Response cache with a probationary jail tier.
///
/// Every persistence operation returns a typed `Result`; failures are already
/// metered and logged by the time the caller sees them, so callers on the
/// request path are free to ignore them.
pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    settings: CacheSettings,
    keys: KeyDeriver,
    metrics: Arc<MetricsCollector>,
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn KvStore>,
        settings: CacheSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            keys: KeyDeriver::from_settings(&settings),
            store,
            settings,
            metrics,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn keys(&self) -> &KeyDeriver {
        &self.keys
    }

    /// Derive the cache key for a request, falling back to `default_model`
    /// when the request does not name one.
    pub fn derive_key(&self, request: &GenerateRequest, default_model: &str) -> Result<CacheKey> {
        let model = request.model_id.as_deref().unwrap_or(default_model);
        self.keys.derive(&request.params, Some(model)).map_err(|e| {
            self.record_failure("", &e);
            e
        })
    }

    /// Fetch a cached entry. Records a hit or a miss; an unreadable or corrupt
    /// entry is metered and returned as `StoreRead`.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let raw = match self.store.get(key.as_str()).await {
            Ok(raw) => raw,
            Err(e) => {
                let err = CacheError::StoreRead(e.to_string());
                self.record_failure(key.as_str(), &err);
                return Err(err);
            }
        };

        let Some(raw) = raw else {
            self.metrics.record_miss(key.as_str());
            self.log(format_args!("Cache miss: {}", self.short(key.as_str())));
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => {
                self.metrics.record_hit(key.as_str(), entry.size());
                self.log(format_args!(
                    "Cache hit: {} ({} chars)",
                    self.short(key.as_str()),
                    entry.text.len()
                ));
                Ok(Some(entry))
            }
            Err(e) => {
                let err = CacheError::StoreRead(format!("corrupt cache entry: {}", e));
                self.record_failure(key.as_str(), &err);
                Err(err)
            }
        }
    }

    /// Write a successful response under `key` with the cache TTL.
    pub async fn cache_successful_response(
        &self,
        key: &CacheKey,
        response: &GenerateResponse,
    ) -> Result<()> {
        let entry = CacheEntry::from(response);
        let result = match serde_json::to_string(&entry) {
            Ok(raw) => self
                .store
                .set_ex(key.as_str(), &raw, self.settings.ttl())
                .await
                .map_err(|e| CacheError::StoreWrite(e.to_string())),
            Err(e) => Err(CacheError::StoreWrite(format!("serialize: {}", e))),
        };

        match result {
            Ok(()) => {
                self.metrics.record_store(key.as_str(), entry.size());
                self.log(format_args!(
                    "Cached response: {} (ttl {}s)",
                    self.short(key.as_str()),
                    self.settings.ttl_seconds
                ));
                Ok(())
            }
            Err(e) => {
                self.record_failure(key.as_str(), &e);
                Err(e)
            }
        }
    }

    /// Count a probationary response for `key`, promoting it into the cache
    /// once the jail threshold is reached.
    ///
    /// The jail record is not removed on promotion; it expires with its TTL.
    pub async fn handle_cache_jail(
        &self,
        key: &CacheKey,
        response: &GenerateResponse,
    ) -> Result<CacheOutcome> {
        let jail_key = self.keys.jail_key(key);

        let count = match self.update_jail(&jail_key, response).await {
            Ok(count) => count,
            Err(e) => {
                let err = CacheError::JailUpdate(e.to_string());
                self.record_failure(key.as_str(), &err);
                return Err(err);
            }
        };

        self.metrics.record_jail_update(key.as_str(), count);
        self.log(format_args!(
            "Jailed response: {} (count {}/{})",
            self.short(key.as_str()),
            count,
            self.settings.jail_threshold
        ));

        if count < self.settings.jail_threshold {
            return Ok(CacheOutcome::Jailed { count });
        }

        self.cache_successful_response(key, response).await?;
        self.metrics.record_jail_promotion(key.as_str(), count);
        self.log(format_args!(
            "Promoted jailed response: {} after {} occurrences",
            self.short(key.as_str()),
            count
        ));
        Ok(CacheOutcome::Promoted { count })
    }

    async fn update_jail(&self, jail_key: &str, response: &GenerateResponse) -> Result<u32> {
        let now = Utc::now();
        let mut entry = match self.store.get(jail_key).await? {
            Some(raw) => serde_json::from_str::<JailEntry>(&raw).unwrap_or_else(|e| {
                warn!(
                    "Discarding unreadable jail record {}: {}",
                    self.short(jail_key),
                    e
                );
                JailEntry::new(now)
            }),
            None => JailEntry::new(now),
        };

        entry.record(response, now);
        let raw = serde_json::to_string(&entry)?;
        self.store
            .set_ex(jail_key, &raw, self.settings.jail_ttl())
            .await?;
        Ok(entry.count)
    }

    /// Classify a completed response and route it to the cache, the jail, or nowhere.
    pub async fn handle_response_caching(
        &self,
        key: &CacheKey,
        response: &GenerateResponse,
    ) -> Result<CacheOutcome> {
        match Classification::of(response) {
            Classification::Success => {
                self.cache_successful_response(key, response).await?;
                Ok(CacheOutcome::Cached)
            }
            Classification::Probationary => self.handle_cache_jail(key, response).await,
            Classification::Uncacheable => {
                let reason = if response.text.is_empty() {
                    "empty text"
                } else {
                    response.finish_reason.as_str()
                };
                self.metrics.record_uncacheable(key.as_str(), reason);
                self.log(format_args!(
                    "Not caching response for {}: {}",
                    self.short(key.as_str()),
                    reason
                ));
                Ok(CacheOutcome::Skipped)
            }
        }
    }

    /// Remove the cache entry and jail record for `key`.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let jail_key = self.keys.jail_key(key);
        let removed_entry = self.store.del(key.as_str()).await;
        let removed_jail = self.store.del(&jail_key).await;

        match (removed_entry, removed_jail) {
            (Ok(a), Ok(b)) => {
                debug!("Invalidated {} (entry={}, jail={})", self.short(key.as_str()), a, b);
                Ok(a || b)
            }
            (Err(e), _) | (_, Err(e)) => {
                let err = CacheError::StoreWrite(e.to_string());
                self.record_failure(key.as_str(), &err);
                Err(err)
            }
        }
    }

    /// Meter and log a swallowed caching-path failure.
    pub fn record_failure(&self, key: &str, error: &CacheError) {
        self.metrics
            .record_error(key, &format!("{}: {}", error.kind(), error));
        warn!("Cache failure for {}: {}", self.short(key), error);
    }

    fn short(&self, key: &str) -> String {
        truncate_for_log(key, self.settings.max_key_log_length)
    }

    fn log(&self, message: fmt::Arguments<'_>) {
        if self.settings.enable_logging {
            debug!("{}", message);
        } else {
            trace!("{}", message);
        }
    }
}
