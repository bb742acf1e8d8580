//! SSE formatting and response writing.

mod sse;
mod writer;

pub use sse::{sse_headers, SseEvent, STREAMED_TEXT_EVENT};
pub use writer::{BodySink, EventSink, SseWriter, WriterOutcome};
