//! Axum-based HTTP front end for the caching proxy.
//!
//! Generation requests are served through the cached model; the remaining
//! routes expose cache statistics, Prometheus metrics and operator actions.
//!
//! # Components
//!
//! - `handlers`: Implementation of individual endpoints (generate, stream, metrics, health).
//! - `middleware`: Request ID tracking layers.
//! - `routes`: The router configuration that ties everything together.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod handlers;
mod middleware;
mod routes;

pub use handlers::{HealthResponse, HealthStatus, InvalidateResponse};
pub use routes::{create_router, AppState};
