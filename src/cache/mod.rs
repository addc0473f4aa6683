//! Response caching with a probationary jail tier.
//!
//! Successful responses are cached under a key derived from the request
//! parameters and model id. Responses that look suspicious (a content filter
//! stop, an `other` finish reason, or call warnings) are held in a jail and only
//! promoted into the cache once the same request has produced one often enough.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod classify;
pub mod key;
pub mod manager;
pub mod middleware;
pub mod models;
pub mod replay;
pub mod store;

pub use classify::Classification;
pub use key::{CacheKey, KeyDeriver, DEFAULT_MODEL_ID};
pub use manager::ResponseCache;
pub use middleware::{CachedModel, StreamAccumulator};
pub use models::{CacheEntry, CacheOutcome, JailEntry, LastResponse};
pub use replay::{replay_stream, ReplayParts};
pub use store::{KvStore, MemoryStore, RedisStore};
