// Streaming part types shared by live and replayed streams
// Author: kelexine (https://github.com/kelexine)

use super::generation::{CallWarning, FinishReason, ResponseMetadata, Usage};
use serde::{Deserialize, Serialize};

/// All possible parts of a generation stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
    StreamStart {
        #[serde(default)]
        warnings: Vec<CallWarning>,
    },
    ResponseMetadata {
        metadata: ResponseMetadata,
    },
    #[serde(rename_all = "camelCase")]
    TextDelta {
        id: String,
        delta: String,
    },
    #[serde(rename_all = "camelCase")]
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
    },
    Error {
        message: String,
    },
}

impl StreamPart {
    /// Format as Server-Sent Event
    pub fn to_sse(&self) -> String {
        let event_name = match self {
            StreamPart::StreamStart { .. } => "stream-start",
            StreamPart::ResponseMetadata { .. } => "response-metadata",
            StreamPart::TextDelta { .. } => "text-delta",
            StreamPart::Finish { .. } => "finish",
            StreamPart::Error { .. } => "error",
        };

        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());

        format!("event: {}\ndata: {}\n\n", event_name, data)
    }
}
