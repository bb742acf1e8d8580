//! SSE (Server-Sent Events) formatting.

use axum::http::header::{self, HeaderName, HeaderValue};
use bytes::Bytes;

use crate::upstream::Token;

/// Event type used for every relayed token.
pub const STREAMED_TEXT_EVENT: &str = "streamed-text";

/// One Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Event carrying one relayed token.
    pub fn streamed_text(token: &Token) -> Self {
        Self::new(STREAMED_TEXT_EVENT, token.as_str())
    }

    /// Render as `event: <event>\ndata: <data>\n\n`.
    ///
    /// Line breaks inside the data become additional `data:` lines, which
    /// clients join back with `\n`. Line breaks in the event name are dropped.
    pub fn render(&self) -> Bytes {
        let event: String = self
            .event
            .chars()
            .filter(|c| *c != '\r' && *c != '\n')
            .collect();

        let mut out = String::with_capacity(event.len() + self.data.len() + 16);
        out.push_str("event: ");
        out.push_str(&event);
        out.push('\n');

        let data = self.data.replace("\r\n", "\n");
        for line in data.split(['\r', '\n']) {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');

        out.into()
    }
}

/// HTTP headers for an SSE response.
pub fn sse_headers() -> [(HeaderName, HeaderValue); 4] {
    [
        (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (header::CONNECTION, HeaderValue::from_static("keep-alive")),
        (
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_streamed_text() {
        let event = SseEvent::streamed_text(&Token::from_line("hello"));
        assert_eq!(
            event.render().as_ref(),
            b"event: streamed-text\ndata: hello\n\n"
        );
    }

    #[test]
    fn test_render_empty_data() {
        let event = SseEvent::new("streamed-text", "");
        assert_eq!(event.render().as_ref(), b"event: streamed-text\ndata: \n\n");
    }

    #[test]
    fn test_render_multiline_data() {
        let event = SseEvent::new("note", "a\r\nb\rc");
        assert_eq!(
            event.render().as_ref(),
            b"event: note\ndata: a\ndata: b\ndata: c\n\n"
        );
    }

    #[test]
    fn test_event_name_cannot_inject_fields() {
        let event = SseEvent::new("x\ndata: injected", "ok");
        assert_eq!(event.render().as_ref(), b"event: xdata: injected\ndata: ok\n\n");
    }

    #[test]
    fn test_sse_headers() {
        let headers = sse_headers();
        assert_eq!(headers[0].1, "text/event-stream");
        assert_eq!(headers[1].1, "no-cache");
        assert_eq!(headers[2].1, "keep-alive");
    }
}
