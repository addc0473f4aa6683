// HTTP routes configuration
// Author: kelexine (https://github.com/kelexine)

use super::handlers::{
    generate_handler, health_handler, invalidate_handler, metrics_handler,
    reset_metrics_handler, stats_handler, stream_handler,
};
use super::middleware::{request_id_layers, trace_layer};
use crate::cache::{CachedModel, ResponseCache};
use crate::config::AppConfig;
use crate::upstream::HttpModel;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub model: Arc<CachedModel<HttpModel>>,
}

impl AppState {
    pub fn cache(&self) -> &Arc<ResponseCache> {
        self.model.cache()
    }
}

pub fn create_router(config: AppConfig, model: CachedModel<HttpModel>) -> Router {
    let state = AppState {
        config: Arc::new(config),
        model: Arc::new(model),
    };

    let (set_request_id, propagate_request_id) = request_id_layers();

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/generate", post(generate_handler))
        .route("/v1/stream", post(stream_handler))
        .route("/cache/stats", get(stats_handler))
        .route("/cache/reset-metrics", post(reset_metrics_handler))
        .route("/cache/entries", delete(invalidate_handler))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(10 * 1024 * 1024))
        .layer(trace_layer())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state)
}
