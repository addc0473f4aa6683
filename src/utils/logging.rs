//! Structured logging and secret redaction for log output.
//!
//! This module configures the `tracing` ecosystem for the service and
//! provides a helper that keeps upstream API keys out of log sinks.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LoggingConfig;
use crate::error::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// Supports two output formats:
/// - `json`: Structured JSON logs for production ingestion.
/// - `pretty` (default): Human-readable output for development.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Replaces every occurrence of `secret` in `input` with a placeholder.
///
/// Used on upstream error bodies and URLs before they are logged, since some
/// providers echo the bearer token back in error payloads.
pub fn redact(input: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => input.replace(secret, "[REDACTED_API_KEY]"),
        _ => input.to_string(),
    }
}
