// Stream reconstruction: replay a cached entry as a chunked stream
// Author: kelexine (https://github.com/kelexine)

use super::models::CacheEntry;
use crate::models::StreamPart;
use futures::stream::{self, Stream};

/// Iterator over the parts of a replayed response.
///
/// Yields the text in `chunk_size`-character deltas, then exactly one finish
/// part. Chunks are cut on char boundaries.
pub struct ReplayParts {
    id: String,
    text: String,
    offset: usize,
    chunk_size: usize,
    finish: Option<StreamPart>,
}

impl ReplayParts {
    pub fn new(entry: &CacheEntry, chunk_size: usize) -> Self {
        Self {
            id: entry.id.clone(),
            text: entry.text.clone(),
            offset: 0,
            chunk_size: chunk_size.max(1),
            finish: Some(StreamPart::Finish {
                finish_reason: entry.finish_reason,
                usage: entry.usage,
            }),
        }
    }
}

impl Iterator for ReplayParts {
    type Item = StreamPart;

    fn next(&mut self) -> Option<StreamPart> {
        if self.offset < self.text.len() {
            let rest = &self.text[self.offset..];
            let end = rest
                .char_indices()
                .nth(self.chunk_size)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let delta = rest[..end].to_string();
            self.offset += end;
            return Some(StreamPart::TextDelta {
                id: self.id.clone(),
                delta,
            });
        }
        self.finish.take()
    }
}

/// Replay a cached entry as a stream of parts. Every call builds a fresh stream.
pub fn replay_stream<E>(
    entry: &CacheEntry,
    chunk_size: usize,
) -> impl Stream<Item = std::result::Result<StreamPart, E>> + Send + 'static
where
    E: Send + 'static,
{
    stream::iter(ReplayParts::new(entry, chunk_size).map(Ok))
}
