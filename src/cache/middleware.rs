// Caching wrapper around a language model: lookup, persist, replay, fail open
// Author: kelexine (https://github.com/kelexine)

use super::key::CacheKey;
use super::manager::ResponseCache;
use super::replay::replay_stream;
use crate::models::{
    CallWarning, FinishReason, GenerateRequest, GenerateResponse, ResponseMetadata, StreamPart,
    Usage,
};
use crate::upstream::{LanguageModel, PartStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

/// A [`LanguageModel`] that serves repeated requests from the response cache.
///
/// Caching never changes what the caller sees on failure: store errors fall
/// back to the wrapped model, and errors from the wrapped model are returned
/// unchanged.
pub struct CachedModel<M> {
    inner: M,
    cache: Arc<ResponseCache>,
}

impl<M: LanguageModel> CachedModel<M> {
    pub fn new(inner: M, cache: Arc<ResponseCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// `None` means the cache is bypassed for this call.
    fn key_for(&self, request: &GenerateRequest) -> Option<CacheKey> {
        self.cache
            .derive_key(request, self.inner.model_id())
            .ok()
    }

    async fn cached_entry(&self, key: &CacheKey) -> Option<super::models::CacheEntry> {
        // Lookup failures are already metered; treat them as a miss
        self.cache.lookup(key).await.ok().flatten()
    }
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for CachedModel<M> {
    type Error = M::Error;

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<GenerateResponse, Self::Error> {
        let Some(key) = self.key_for(request) else {
            return self.inner.generate(request).await;
        };

        if let Some(entry) = self.cached_entry(&key).await {
            return Ok(entry.to_response());
        }

        let response = self.inner.generate(request).await?;
        // Persistence failures are metered and logged by the cache
        let _ = self.cache.handle_response_caching(&key, &response).await;
        Ok(response)
    }

    async fn stream(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<PartStream<Self::Error>, Self::Error> {
        let Some(key) = self.key_for(request) else {
            return self.inner.stream(request).await;
        };

        if let Some(entry) = self.cached_entry(&key).await {
            let chunk_size = self.cache.settings().stream_chunk_size;
            return Ok(Box::pin(replay_stream(&entry, chunk_size)));
        }

        let live = self.inner.stream(request).await?;
        Ok(tap_stream(live, self.cache.clone(), key))
    }
}

/// Pass every part through unchanged while accumulating the response, then
/// hand a complete response to the cache on a spawned task.
///
/// Nothing is persisted if the stream is dropped early, yields an error, or
/// ends without a finish part.
fn tap_stream<E>(mut live: PartStream<E>, cache: Arc<ResponseCache>, key: CacheKey) -> PartStream<E>
where
    E: Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut accumulator = StreamAccumulator::default();

        while let Some(item) = live.next().await {
            match &item {
                Ok(part) => accumulator.observe(part),
                Err(_) => accumulator.fail(),
            }
            yield item;
        }

        match accumulator.into_response() {
            Some(response) => {
                tokio::spawn(async move {
                    let _ = cache.handle_response_caching(&key, &response).await;
                });
            }
            None => debug!("Stream ended incomplete, not caching"),
        }
    })
}

/// Rebuilds a complete response from the parts of a live stream.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: Option<String>,
    text: String,
    warnings: Vec<CallWarning>,
    metadata: Option<ResponseMetadata>,
    finish: Option<(FinishReason, Usage)>,
    failed: bool,
}

impl StreamAccumulator {
    pub fn observe(&mut self, part: &StreamPart) {
        match part {
            StreamPart::StreamStart { warnings } => self.warnings.extend(warnings.iter().cloned()),
            StreamPart::ResponseMetadata { metadata } => self.metadata = Some(metadata.clone()),
            StreamPart::TextDelta { id, delta } => {
                if self.id.is_none() {
                    self.id = Some(id.clone());
                }
                self.text.push_str(delta);
            }
            StreamPart::Finish {
                finish_reason,
                usage,
            } => self.finish = Some((*finish_reason, *usage)),
            StreamPart::Error { .. } => self.failed = true,
        }
    }

    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// The accumulated response, or `None` if the stream did not complete cleanly.
    pub fn into_response(self) -> Option<GenerateResponse> {
        if self.failed {
            return None;
        }
        let (finish_reason, usage) = self.finish?;

        let mut response = GenerateResponse::text(self.text, finish_reason);
        response.usage = usage;
        response.warnings = self.warnings;
        response.response = self.metadata;
        if let Some(id) = self.id {
            response.id = id;
        }
        Some(response)
    }
}
