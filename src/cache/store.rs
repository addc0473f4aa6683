// Backing key-value stores for cache and jail records
// Author: kelexine (https://github.com/kelexine)

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// A TTL-capable string key-value store (`GET` / `SETEX` / `DEL`).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn del(&self, key: &str) -> Result<bool>;
    /// Round-trip check used by the health endpoint.
    async fn ping(&self) -> Result<()>;
    /// Drop any open connection. Idempotent.
    async fn close(&self) {}
    fn name(&self) -> &'static str;
}

/// Build the configured store.
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Redis => Ok(Arc::new(RedisStore::with_timeouts(
            &config.redis_url,
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.reconnect_cooldown_ms),
        )?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Default bound on opening a Redis connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// Default window after a failed connect during which calls fail fast.
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(5);

/// Redis-compatible store.
///
/// The connection is opened lazily on first use and shared afterwards;
/// reconnection after a dropped link is left to [`ConnectionManager`].
/// Opening is bounded by `connect_timeout`, and after a failed open every
/// call fails immediately until `reconnect_cooldown` has passed.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
    last_failure: Mutex<Option<Instant>>,
    connect_timeout: Duration,
    reconnect_cooldown: Duration,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_timeouts(url, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_COOLDOWN)
    }

    pub fn with_timeouts(
        url: &str,
        connect_timeout: Duration,
        reconnect_cooldown: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Config(format!("invalid redis URL: {}", e)))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            last_failure: Mutex::new(None),
            connect_timeout,
            reconnect_cooldown,
        })
    }

    /// Open the shared connection if it is not open yet.
    ///
    /// No lock is held while connecting, so concurrent callers never queue
    /// behind a slow connect.
    pub async fn connect(&self) -> Result<ConnectionManager> {
        let cached = self.connection.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let last_failure = *self.last_failure.lock();
        if let Some(failed_at) = last_failure {
            let waited = failed_at.elapsed();
            if waited < self.reconnect_cooldown {
                return Err(CacheError::StoreRead(format!(
                    "redis unavailable, next connect attempt in {}ms",
                    (self.reconnect_cooldown - waited).as_millis()
                )));
            }
        }

        let attempt = tokio::time::timeout(
            self.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await;
        let conn = match attempt {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(self.connect_failed(e.into())),
            Err(_) => {
                return Err(self.connect_failed(CacheError::StoreRead(format!(
                    "connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))))
            }
        };

        *self.last_failure.lock() = None;
        info!("Connected to redis store");
        let mut slot = self.connection.lock();
        Ok(slot.get_or_insert(conn).clone())
    }

    fn connect_failed(&self, error: CacheError) -> CacheError {
        *self.last_failure.lock() = Some(Instant::now());
        debug!(
            "Redis connect failed, failing fast for {}ms: {}",
            self.reconnect_cooldown.as_millis(),
            error
        );
        error
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self
            .connect()
            .await
            .map_err(|e| CacheError::StoreRead(format!("connection failed: {}", e)))?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::StoreRead(format!("GET failed: {}", e)))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self
            .connect()
            .await
            .map_err(|e| CacheError::StoreWrite(format!("connection failed: {}", e)))?;
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::StoreWrite(format!("SETEX failed: {}", e)))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self
            .connect()
            .await
            .map_err(|e| CacheError::StoreWrite(format!("connection failed: {}", e)))?;
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::StoreWrite(format!("DEL failed: {}", e)))?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) {
        let closed = self.connection.lock().take();
        if closed.is_some() {
            debug!("Closed redis store connection");
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Default minimum gap between sweeps of expired records.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MIN_SWEEP_LEN: usize = 64;

struct MemoryRecord {
    value: String,
    expires_at: Instant,
}

struct MemoryRecords {
    map: HashMap<String, MemoryRecord>,
    last_sweep: Instant,
    // Growth trigger, doubled from the live size after each sweep
    sweep_at_len: usize,
}

impl MemoryRecords {
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, record| record.expires_at > now);
        self.last_sweep = now;
        self.sweep_at_len = (self.map.len() * 2).max(MIN_SWEEP_LEN);
        before - self.map.len()
    }
}

/// In-process store with per-key expiry.
///
/// An expired record is dropped when it is read, and writes sweep every
/// expired record once `sweep_interval` has passed or the map has doubled
/// since the last sweep.
pub struct MemoryStore {
    records: Mutex<MemoryRecords>,
    sweep_interval: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            records: Mutex::new(MemoryRecords {
                map: HashMap::new(),
                last_sweep: Instant::now(),
                sweep_at_len: MIN_SWEEP_LEN,
            }),
            sweep_interval,
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records
            .lock()
            .map
            .values()
            .filter(|r| r.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records held in memory, expired ones included.
    pub fn held_len(&self) -> usize {
        self.records.lock().map.len()
    }

    /// Drop every expired record now. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.records.lock().sweep(Instant::now())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut records = self.records.lock();
        match records.map.get(key) {
            Some(record) if record.expires_at > Instant::now() => Ok(Some(record.value.clone())),
            Some(_) => {
                records.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut records = self.records.lock();
        if records.map.len() >= records.sweep_at_len
            || now.duration_since(records.last_sweep) >= self.sweep_interval
        {
            let dropped = records.sweep(now);
            if dropped > 0 {
                trace!("Swept {} expired records from memory store", dropped);
            }
        }
        records.map.insert(
            key.to_string(),
            MemoryRecord {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.records.lock().map.remove(key).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
