// Language model abstraction and the HTTP upstream client
// Author: kelexine (https://github.com/kelexine)

mod client;
pub mod streaming;

pub use client::HttpModel;

use crate::models::{GenerateRequest, GenerateResponse, StreamPart};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed stream of parts, failing with the model's own error type.
pub type PartStream<E> = Pin<Box<dyn Stream<Item = std::result::Result<StreamPart, E>> + Send>>;

/// A text generation capability that can be called directly or streamed.
///
/// Implemented by the HTTP upstream client and by the caching wrapper, so the
/// wrapper can be layered over any model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Model identifier used when a request does not name one.
    fn model_id(&self) -> &str;

    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<GenerateResponse, Self::Error>;

    async fn stream(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<PartStream<Self::Error>, Self::Error>;
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for Arc<M> {
    type Error = M::Error;

    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<GenerateResponse, Self::Error> {
        (**self).generate(request).await
    }

    async fn stream(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<PartStream<Self::Error>, Self::Error> {
        (**self).stream(request).await
    }
}
