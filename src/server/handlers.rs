// HTTP request handlers
// Author: kelexine (https://github.com/kelexine)

use super::routes::AppState;
use crate::error::{CacheError, Result};
use crate::metrics::{CacheEvent, CacheMetrics};
use crate::models::{GenerateRequest, StreamPart};
use crate::upstream::LanguageModel;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval between keep-alive comments on an idle SSE stream.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HashMap<String, HealthCheck>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: String,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = HashMap::new();
    let mut overall_status = HealthStatus::Healthy;
    let store = state.cache().store();

    // The service keeps answering without its store, only uncached
    let store_check = match store.ping().await {
        Ok(()) => HealthCheck {
            status: "ok".to_string(),
            message: format!("{} store reachable", store.name()),
        },
        Err(e) => {
            overall_status = HealthStatus::Degraded;
            HealthCheck {
                status: "error".to_string(),
                message: e.to_string(),
            }
        }
    };
    checks.insert("store".to_string(), store_check);

    checks.insert(
        "metrics".to_string(),
        HealthCheck {
            status: "ok".to_string(),
            message: if state.cache().metrics().is_enabled() {
                "enabled".to_string()
            } else {
                "disabled".to_string()
            },
        },
    );

    checks.insert(
        "configuration".to_string(),
        HealthCheck {
            status: "ok".to_string(),
            message: format!("Upstream: {}", state.config.upstream.base_url),
        },
    );

    Json(HealthResponse {
        status: overall_status,
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

fn parse_request(body: &str) -> Result<GenerateRequest> {
    serde_json::from_str(body).map_err(|e| {
        warn!("Failed to deserialize request: {}", e);
        CacheError::InvalidRequest(format!("JSON deserialization error: {}", e))
    })
}

/// Handler for POST /v1/generate
pub async fn generate_handler(State(state): State<AppState>, body: String) -> Result<Response> {
    let request = parse_request(&body)?;
    debug!("Received generate request for model {:?}", request.model_id);

    let response = state.model.generate(&request).await?;
    Ok(Json(response).into_response())
}

/// Handler for POST /v1/stream (Server-Sent Events)
pub async fn stream_handler(State(state): State<AppState>, body: String) -> Result<Response> {
    let request = parse_request(&body)?;
    debug!("Received stream request for model {:?}", request.model_id);

    let mut parts = state.model.stream(&request).await?;

    let sse_stream = async_stream::stream! {
        loop {
            tokio::select! {
                part = parts.next() => {
                    match part {
                        Some(Ok(part)) => {
                            yield Ok::<String, std::convert::Infallible>(part.to_sse());
                        }
                        Some(Err(e)) => {
                            warn!("Stream error: {}", e);
                            yield Ok(StreamPart::Error { message: e.to_string() }.to_sse());
                            break;
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {
                    yield Ok(": keep-alive\n\n".to_string());
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(sse_stream))
        .map_err(|e| CacheError::Internal(format!("Failed to build SSE response: {}", e)))
}

/// Handler for GET /metrics (Prometheus text format)
pub async fn metrics_handler(State(state): State<AppState>) -> Result<Response> {
    let body = state.cache().metrics().export_prometheus()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

fn default_event_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub store: &'static str,
    pub metrics: CacheMetrics,
    pub recent_events: Vec<CacheEvent>,
}

/// Handler for GET /cache/stats
pub async fn stats_handler(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<StatsResponse> {
    let metrics = state.cache().metrics();
    Json(StatsResponse {
        store: state.cache().store().name(),
        metrics: metrics.snapshot(),
        recent_events: metrics.recent_events(query.limit),
    })
}

/// Handler for POST /cache/reset-metrics
pub async fn reset_metrics_handler(State(state): State<AppState>) -> StatusCode {
    state.cache().metrics().reset();
    info!("Cache metrics reset");
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub key: String,
    pub removed: bool,
}

/// Handler for DELETE /cache/entries: drop the entry and jail record for a request
pub async fn invalidate_handler(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<InvalidateResponse>> {
    let request = parse_request(&body)?;
    let cache = state.cache();
    let key = cache.derive_key(&request, state.model.model_id())?;
    let removed = cache.invalidate(&key).await?;

    info!("Invalidated cache entry (removed={})", removed);
    Ok(Json(InvalidateResponse {
        key: key.to_string(),
        removed,
    }))
}
