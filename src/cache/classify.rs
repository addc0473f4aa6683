// Response classification: what may be cached, what goes to jail
// Author: kelexine (https://github.com/kelexine)

use crate::models::{FinishReason, GenerateResponse};
use serde::Serialize;

/// Where a completed response belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Safe to cache immediately.
    Success,
    /// Plausible but suspicious; cached only after repeated reproduction.
    Probationary,
    /// Never stored.
    Uncacheable,
}

impl Classification {
    pub fn of(response: &GenerateResponse) -> Self {
        if is_success(response) {
            Classification::Success
        } else if is_probationary(response) {
            Classification::Probationary
        } else {
            Classification::Uncacheable
        }
    }
}

/// A clean finish with text and no warnings.
pub fn is_success(response: &GenerateResponse) -> bool {
    !matches!(
        response.finish_reason,
        FinishReason::Error | FinishReason::Other | FinishReason::ContentFilter
    ) && !response.text.is_empty()
        && response.warnings.is_empty()
}

/// Text was produced but the finish was filtered/unexplained or came with warnings.
/// Errors are never jailed.
pub fn is_probationary(response: &GenerateResponse) -> bool {
    if response.text.is_empty() || response.finish_reason == FinishReason::Error {
        return false;
    }
    matches!(
        response.finish_reason,
        FinishReason::Other | FinishReason::ContentFilter
    ) || !response.warnings.is_empty()
}
