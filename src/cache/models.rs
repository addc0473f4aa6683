// Persisted cache and jail records
// Author: kelexine (https://github.com/kelexine)

use crate::models::{CallWarning, FinishReason, GenerateResponse, ResponseMetadata, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A successful response as written to the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub text: String,
    /// Records written without a finish reason are read back as `stop`.
    #[serde(default = "default_entry_finish_reason")]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub warnings: Vec<CallWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_call: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseMetadata>,
    #[serde(default)]
    pub id: String,
}

fn default_entry_finish_reason() -> FinishReason {
    FinishReason::Stop
}

impl CacheEntry {
    /// Size used for the average-response-size metric.
    pub fn size(&self) -> usize {
        self.text.len()
    }

    /// The response returned to a caller on a hit.
    ///
    /// The id and the response timestamp are refreshed so the replay looks like
    /// a fresh call; the stored entry itself is left untouched.
    pub fn to_response(&self) -> GenerateResponse {
        let id = format!("gen_{}", uuid::Uuid::new_v4().simple());
        let mut metadata = self.response.clone().unwrap_or_default();
        metadata.id = Some(id.clone());
        metadata.timestamp = Some(Utc::now());

        GenerateResponse {
            text: self.text.clone(),
            finish_reason: self.finish_reason,
            usage: self.usage,
            warnings: self.warnings.clone(),
            raw_call: self.raw_call.clone(),
            raw_response: self.raw_response.clone(),
            response: Some(metadata),
            id,
        }
    }
}

impl From<&GenerateResponse> for CacheEntry {
    fn from(response: &GenerateResponse) -> Self {
        Self {
            text: response.text.clone(),
            finish_reason: response.finish_reason,
            usage: response.usage,
            warnings: response.warnings.clone(),
            raw_call: response.raw_call.clone(),
            raw_response: response.raw_response.clone(),
            response: response.response.clone(),
            id: response.id.clone(),
        }
    }
}

/// Summary of the most recent probationary response for a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastResponse {
    pub finish_reason: FinishReason,
    pub has_warnings: bool,
    pub text_length: usize,
}

impl From<&GenerateResponse> for LastResponse {
    fn from(response: &GenerateResponse) -> Self {
        Self {
            finish_reason: response.finish_reason,
            has_warnings: !response.warnings.is_empty(),
            text_length: response.text.chars().count(),
        }
    }
}

/// Probation record for a key whose responses are not yet trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JailEntry {
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<LastResponse>,
}

impl JailEntry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            first_seen: now,
            last_seen: now,
            last_response: None,
        }
    }

    /// Count one more probationary occurrence.
    pub fn record(&mut self, response: &GenerateResponse, now: DateTime<Utc>) {
        self.count = self.count.saturating_add(1);
        self.last_seen = now;
        self.last_response = Some(LastResponse::from(response));
    }
}

/// What [`handle_response_caching`](super::ResponseCache::handle_response_caching) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CacheOutcome {
    Cached,
    Jailed { count: u32 },
    Promoted { count: u32 },
    Skipped,
}
