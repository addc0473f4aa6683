// Data models for generation calls and their streams
// Author: kelexine (https://github.com/kelexine)

pub mod generation;
pub mod streaming;

pub use generation::{
    CallWarning, FinishReason, GenerateRequest, GenerateResponse, ResponseMetadata, Usage,
};
pub use streaming::StreamPart;
