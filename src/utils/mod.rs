//! Utility functions and helpers for gencache.
//!
//! # Submodules
//!
//! - `logging`: Tracing initialization and secret redaction.
//! - `retry`: Retry with backoff that respects upstream Retry-After hints.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
pub mod retry;
