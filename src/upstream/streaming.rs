// Upstream SSE stream parsing
// Author: kelexine (https://github.com/kelexine)

use crate::error::{CacheError, Result};
use crate::models::StreamPart;
use bytes::BytesMut;
use futures::stream::Stream;
use tracing::{debug, warn};

/// Parse an SSE byte stream into stream parts.
///
/// Events are separated by a blank line; each event's `data:` line holds one
/// JSON-encoded [`StreamPart`]. Unparseable events are skipped, transport
/// errors end the stream with an `Err` item.
pub fn parse_sse_stream<S>(byte_stream: S) -> impl Stream<Item = Result<StreamPart>> + Send
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    use futures::StreamExt;

    async_stream::stream! {
        // Raw bytes, so a UTF-8 sequence split across chunks is decoded whole
        let mut buffer = BytesMut::new();

        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    buffer.extend_from_slice(&chunk);

                    // Process complete events (ends with \n\n)
                    while let Some(event_end) = find_event_end(&buffer) {
                        let event = buffer.split_to(event_end + 2);
                        if let Some(part) = decode_event(&event[..event_end]) {
                            yield Ok(part);
                        }
                    }
                }
                Err(e) => {
                    warn!("Upstream stream error: {}", e);
                    yield Err(CacheError::Http(e));
                    return;
                }
            }
        }

        // The final event may arrive without a trailing blank line
        if let Some(part) = decode_event(&buffer) {
            yield Ok(part);
        }

        debug!("Upstream SSE stream ended");
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn decode_event(raw: &[u8]) -> Option<StreamPart> {
    match std::str::from_utf8(raw) {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => parse_sse_event(text),
        Err(e) => {
            warn!("Skipping upstream SSE event with invalid UTF-8: {}", e);
            None
        }
    }
}

/// Parse a single SSE event into a stream part
pub fn parse_sse_event(event_data: &str) -> Option<StreamPart> {
    // SSE format: "event: <name>\ndata: <json>" or just "data: <json>"
    let data = event_data
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
        .map(str::trim)?;

    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<StreamPart>(data) {
        Ok(part) => Some(part),
        Err(e) => {
            warn!("Failed to parse upstream SSE event: {}", e);
            debug!("Raw data: {}", data.chars().take(200).collect::<String>());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FinishReason, Usage};
    use futures::StreamExt;

    #[test]
    fn test_parse_sse_event() {
        let event = "event: text-delta\ndata: {\"type\":\"text-delta\",\"id\":\"g1\",\"delta\":\" Hello\"}";
        assert_eq!(
            parse_sse_event(event),
            Some(StreamPart::TextDelta {
                id: "g1".to_string(),
                delta: " Hello".to_string()
            })
        );
    }

    #[test]
    fn test_parse_sse_event_no_data() {
        assert!(parse_sse_event("event: ping").is_none());
        assert!(parse_sse_event("data: [DONE]").is_none());
        assert!(parse_sse_event("data: {not json").is_none());
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let finish = StreamPart::Finish {
            finish_reason: FinishReason::Stop,
            usage: Usage::new(1, 2),
        };
        let body = format!(
            "{}{}",
            StreamPart::TextDelta {
                id: "g1".to_string(),
                delta: "hi".to_string()
            }
            .to_sse(),
            finish.to_sse()
        );
        let (a, b) = body.split_at(body.len() / 2);
        let chunks: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from(a.to_string())),
            Ok(bytes::Bytes::from(b.to_string())),
        ];

        let parts: Vec<_> = parse_sse_stream(futures::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].as_ref().unwrap(), &finish);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let delta = StreamPart::TextDelta {
            id: "g1".to_string(),
            delta: "café au lait".to_string(),
        };
        let body = delta.to_sse().into_bytes();
        // Cut between the two bytes of 'é'
        let cut = body.windows(2).position(|pair| pair == [0xC3u8, 0xA9]).unwrap() + 1;
        let chunks: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::copy_from_slice(&body[..cut])),
            Ok(bytes::Bytes::copy_from_slice(&body[cut..])),
        ];

        let parts: Vec<_> = parse_sse_stream(futures::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_ref().unwrap(), &delta);
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let body = "data: {\"type\":\"text-delta\",\"id\":\"g1\",\"delta\":\"ñ\"}";
        let bytes = body.as_bytes();
        // Cut inside 'ñ'
        let cut = bytes.len() - 3;
        let chunks: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::copy_from_slice(&bytes[..cut])),
            Ok(bytes::Bytes::copy_from_slice(&bytes[cut..])),
        ];

        let parts: Vec<_> = parse_sse_stream(futures::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(
            parts[0].as_ref().unwrap(),
            &StreamPart::TextDelta {
                id: "g1".to_string(),
                delta: "ñ".to_string()
            }
        );
    }
}
