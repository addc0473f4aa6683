// End-to-end cache behaviour through the public API
// Author: kelexine (https://github.com/kelexine)

use async_trait::async_trait;
use futures::StreamExt;
use gencache::cache::{
    CacheOutcome, CachedModel, KvStore, MemoryStore, RedisStore, ResponseCache,
};
use gencache::config::CacheSettings;
use gencache::error::{CacheError, Result};
use gencache::metrics::MetricsCollector;
use gencache::models::{
    CallWarning, FinishReason, GenerateRequest, GenerateResponse, StreamPart, Usage,
};
use gencache::upstream::{LanguageModel, PartStream};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Store whose every operation fails.
struct BrokenStore;

#[async_trait]
impl KvStore for BrokenStore {
    async fn get(&self, _: &str) -> Result<Option<String>> {
        Err(CacheError::StoreRead("connection refused".to_string()))
    }
    async fn set_ex(&self, _: &str, _: &str, _: Duration) -> Result<()> {
        Err(CacheError::StoreWrite("connection refused".to_string()))
    }
    async fn del(&self, _: &str) -> Result<bool> {
        Err(CacheError::StoreWrite("connection refused".to_string()))
    }
    async fn ping(&self) -> Result<()> {
        Err(CacheError::StoreRead("connection refused".to_string()))
    }
    fn name(&self) -> &'static str {
        "broken"
    }
}

/// Model that answers every call with the same response.
struct FixedModel {
    response: GenerateResponse,
    calls: AtomicUsize,
}

impl FixedModel {
    fn new(response: GenerateResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FixedModel {
    type Error = CacheError;

    fn model_id(&self) -> &str {
        "fixed-model"
    }

    async fn generate(&self, _: &GenerateRequest) -> Result<GenerateResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    async fn stream(&self, _: &GenerateRequest) -> Result<PartStream<CacheError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = self.response.id.clone();
        let mut parts: Vec<Result<StreamPart>> = vec![Ok(StreamPart::StreamStart {
            warnings: self.response.warnings.clone(),
        })];
        for chunk in self.response.text.as_bytes().chunks(4) {
            parts.push(Ok(StreamPart::TextDelta {
                id: id.clone(),
                delta: String::from_utf8_lossy(chunk).to_string(),
            }));
        }
        parts.push(Ok(StreamPart::Finish {
            finish_reason: self.response.finish_reason,
            usage: self.response.usage,
        }));
        Ok(Box::pin(futures::stream::iter(parts)))
    }
}

fn response_cache(store: Arc<dyn KvStore>) -> Arc<ResponseCache> {
    let metrics = Arc::new(MetricsCollector::new(true).unwrap());
    Arc::new(ResponseCache::new(store, CacheSettings::default(), metrics))
}

fn request(prompt: &str) -> GenerateRequest {
    GenerateRequest::new("fixed-model", json!({"prompt": prompt, "temperature": 0.2}))
}

fn stop_response(text: &str) -> GenerateResponse {
    let mut response = GenerateResponse::text(text, FinishReason::Stop);
    response.usage = Usage::new(10, 20);
    response
}

#[tokio::test]
async fn test_hit_miss_round_trip() {
    let model = FixedModel::new(stop_response("The answer is 42."));
    let cached = CachedModel::new(model.clone(), response_cache(Arc::new(MemoryStore::new())));

    let first = cached.generate(&request("q")).await.unwrap();
    let second = cached.generate(&request("q")).await.unwrap();

    assert_eq!(model.calls(), 1);
    assert_eq!(second.text, first.text);
    assert_eq!(second.finish_reason, FinishReason::Stop);
    assert_eq!(second.usage, Usage::new(10, 20));

    let metrics = cached.cache().metrics().snapshot();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.successful_caches, 1);
    assert!((metrics.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_object_key_order_does_not_matter() {
    let model = FixedModel::new(stop_response("same"));
    let cached = CachedModel::new(model.clone(), response_cache(Arc::new(MemoryStore::new())));

    let a = GenerateRequest::new("fixed-model", json!({"prompt": "p", "temperature": 0.2}));
    let b = GenerateRequest::new("fixed-model", json!({"temperature": 0.2, "prompt": "p"}));
    cached.generate(&a).await.unwrap();
    cached.generate(&b).await.unwrap();

    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_jail_promotion_after_three_filtered_responses() {
    let model = FixedModel::new(GenerateResponse::text(
        "I can only share part of that.",
        FinishReason::ContentFilter,
    ));
    let cached = CachedModel::new(model.clone(), response_cache(Arc::new(MemoryStore::new())));

    for _ in 0..3 {
        cached.generate(&request("sensitive")).await.unwrap();
    }
    assert_eq!(model.calls(), 3);

    // Fourth call is served from the promoted entry
    let fourth = cached.generate(&request("sensitive")).await.unwrap();
    assert_eq!(model.calls(), 3);
    assert_eq!(fourth.finish_reason, FinishReason::ContentFilter);

    let metrics = cached.cache().metrics().snapshot();
    assert_eq!(metrics.problematic_responses, 3);
    assert_eq!(metrics.jail_promotions, 1);
}

#[tokio::test]
async fn test_outcomes_reported_by_dispatch() {
    let cache = response_cache(Arc::new(MemoryStore::new()));
    let key = cache.derive_key(&request("w"), "fixed-model").unwrap();

    let mut warned = stop_response("ok");
    warned.warnings.push(CallWarning::UnsupportedSetting {
        setting: "seed".to_string(),
        details: None,
    });

    assert_eq!(
        cache.handle_response_caching(&key, &warned).await.unwrap(),
        CacheOutcome::Jailed { count: 1 }
    );
    assert_eq!(
        cache
            .handle_response_caching(&key, &GenerateResponse::text("x", FinishReason::Error))
            .await
            .unwrap(),
        CacheOutcome::Skipped
    );
    assert_eq!(
        cache.handle_response_caching(&key, &stop_response("ok")).await.unwrap(),
        CacheOutcome::Cached
    );
}

#[tokio::test]
async fn test_fail_open_with_broken_store() {
    let model = FixedModel::new(stop_response("still works"));
    let cached = CachedModel::new(model.clone(), response_cache(Arc::new(BrokenStore)));

    let response = cached.generate(&request("q")).await.unwrap();
    assert_eq!(response.text, "still works");

    let streamed: Vec<_> = cached
        .stream(&request("q"))
        .await
        .unwrap()
        .map(|p| p.unwrap())
        .collect()
        .await;
    assert!(matches!(streamed.last(), Some(StreamPart::Finish { .. })));

    assert_eq!(model.calls(), 2);
    // Give the spawned stream persistence a moment to fail and be metered
    tokio::time::sleep(Duration::from_millis(50)).await;
    let metrics = cached.cache().metrics().snapshot();
    assert!(metrics.cache_errors >= 3);
    assert_eq!(metrics.hits, 0);
}

#[tokio::test]
async fn test_unreachable_redis_does_not_stall_calls() {
    // Port 1 is never a redis server
    let store = Arc::new(RedisStore::new("redis://127.0.0.1:1").unwrap());
    let model = FixedModel::new(stop_response("served anyway"));
    let cached = CachedModel::new(model.clone(), response_cache(store));

    let started = Instant::now();
    let first = cached.generate(&request("q")).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(first.text, "served anyway");

    // Later calls fail fast while the store is cooling down
    let started = Instant::now();
    let second = cached.generate(&request("q")).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(second.text, "served anyway");

    assert_eq!(model.calls(), 2);
    let metrics = cached.cache().metrics().snapshot();
    assert!(metrics.cache_errors >= 2);
    assert_eq!(metrics.hits, 0);
}

#[tokio::test]
async fn test_stream_is_cached_then_replayed() {
    let model = FixedModel::new(stop_response("Hello world!"));
    let cache = response_cache(Arc::new(MemoryStore::new()));
    let cached = CachedModel::new(model.clone(), cache.clone());

    let live: Vec<_> = cached
        .stream(&request("s"))
        .await
        .unwrap()
        .map(|p| p.unwrap())
        .collect()
        .await;
    assert_eq!(live.len(), 5);

    let key = cache.derive_key(&request("s"), "fixed-model").unwrap();
    let mut stored = None;
    for _ in 0..50 {
        if let Ok(Some(entry)) = cache.lookup(&key).await {
            stored = Some(entry);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stored = stored.expect("stream was not cached");
    assert_eq!(stored.text, "Hello world!");

    let replayed: Vec<_> = cached
        .stream(&request("s"))
        .await
        .unwrap()
        .map(|p| p.unwrap())
        .collect()
        .await;
    assert_eq!(model.calls(), 1);

    let deltas: Vec<usize> = replayed
        .iter()
        .filter_map(|p| match p {
            StreamPart::TextDelta { delta, .. } => Some(delta.len()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec![5, 5, 2]);
    assert_eq!(
        replayed.last(),
        Some(&StreamPart::Finish {
            finish_reason: FinishReason::Stop,
            usage: Usage::new(10, 20),
        })
    );
}

#[tokio::test]
async fn test_streamed_warnings_are_jailed() {
    let mut warned = stop_response("fine text");
    warned.warnings.push(CallWarning::Other {
        message: "topK ignored".to_string(),
    });
    let model = FixedModel::new(warned);
    let cache = response_cache(Arc::new(MemoryStore::new()));
    let cached = CachedModel::new(model, cache.clone());

    let _: Vec<_> = cached.stream(&request("j")).await.unwrap().collect().await;

    let mut jailed = false;
    for _ in 0..50 {
        if cache.metrics().snapshot().problematic_responses == 1 {
            jailed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(jailed);
    let key = cache.derive_key(&request("j"), "fixed-model").unwrap();
    tokio_test::assert_ok!(cache.lookup(&key).await);
    assert!(cache.lookup(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalidate_forces_fresh_call() {
    let model = FixedModel::new(stop_response("v1"));
    let cache = response_cache(Arc::new(MemoryStore::new()));
    let cached = CachedModel::new(model.clone(), cache.clone());

    cached.generate(&request("i")).await.unwrap();
    let key = cache.derive_key(&request("i"), "fixed-model").unwrap();
    assert!(cache.invalidate(&key).await.unwrap());

    cached.generate(&request("i")).await.unwrap();
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_disabled_metrics_record_nothing() {
    let metrics = Arc::new(MetricsCollector::new(false).unwrap());
    let cache = Arc::new(ResponseCache::new(
        Arc::new(MemoryStore::new()),
        CacheSettings::default(),
        metrics,
    ));
    let cached = CachedModel::new(FixedModel::new(stop_response("x")), cache.clone());

    cached.generate(&request("m")).await.unwrap();
    cached.generate(&request("m")).await.unwrap();

    let snapshot = cache.metrics().snapshot();
    assert_eq!(snapshot.hits + snapshot.misses, 0);
    assert!(cache.metrics().recent_events(10).is_empty());
}
