//! Test pattern handling.
//!
//! The `X-Test-Pattern` request header selects the response body:
//! - `unicode` - Emoji, CJK, 4-byte UTF-8 tokens
//! - `padded` - Tokens surrounded by whitespace, some CRLF terminated
//! - `empty` - No tokens at all
//! - `abort:N` - Body fails after N lines
//! - `status:N` - Answer with HTTP status N and no stream

use bytes::Bytes;

use crate::responses::{default_lines, line};
use crate::test_data::{PADDED_LINES, UNICODE_TOKENS};

/// Parsed test pattern from X-Test-Pattern header.
#[derive(Debug, Clone, PartialEq)]
pub enum TestPattern {
    /// Prompt echo followed by the counting sequence
    Default,
    Unicode,
    Padded,
    Empty,
    /// Fail the body after N lines (for testing partial stream handling)
    Abort(usize),
    /// Refuse with the given HTTP status
    Status(u16),
}

impl TestPattern {
    /// Parse X-Test-Pattern header value into a TestPattern.
    pub fn parse(header: Option<&str>) -> Self {
        let header = match header {
            Some(h) => h.trim(),
            None => return TestPattern::Default,
        };

        match header {
            "unicode" => TestPattern::Unicode,
            "padded" => TestPattern::Padded,
            "empty" => TestPattern::Empty,
            s if s.starts_with("abort:") => TestPattern::Abort(s[6..].parse().unwrap_or(3)),
            s if s.starts_with("status:") => {
                TestPattern::Status(s[7..].parse().unwrap_or(503))
            }
            _ => TestPattern::Default,
        }
    }

    /// Short name echoed in `X-Test-Pattern-Applied`.
    pub fn name(&self) -> &'static str {
        match self {
            TestPattern::Default => "default",
            TestPattern::Unicode => "unicode",
            TestPattern::Padded => "padded",
            TestPattern::Empty => "empty",
            TestPattern::Abort(_) => "abort",
            TestPattern::Status(_) => "status",
        }
    }
}

/// Lines to stream for one request.
#[derive(Debug)]
pub struct PatternLines {
    lines: Vec<Bytes>,
    abort_after: Option<usize>,
}

impl PatternLines {
    pub fn new(pattern: &TestPattern, prompt: &str, token_count: usize) -> Self {
        match pattern {
            TestPattern::Default => Self::complete(default_lines(prompt, token_count)),
            TestPattern::Unicode => {
                Self::complete(UNICODE_TOKENS.iter().map(|t| line(*t)).collect())
            }
            TestPattern::Padded => Self::complete(
                PADDED_LINES
                    .iter()
                    .copied()
                    .map(|l| Bytes::from_static(l.as_bytes()))
                    .collect(),
            ),
            TestPattern::Empty | TestPattern::Status(_) => Self::complete(Vec::new()),
            TestPattern::Abort(n) => {
                let mut lines = default_lines(prompt, token_count.max(*n));
                lines.truncate(*n);
                Self {
                    lines,
                    abort_after: Some(*n),
                }
            }
        }
    }

    fn complete(lines: Vec<Bytes>) -> Self {
        Self {
            lines,
            abort_after: None,
        }
    }

    /// Number of lines sent before the body ends or fails.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// `Some(n)` if the body must fail after its n lines.
    pub fn abort_after(&self) -> Option<usize> {
        self.abort_after
    }

    pub fn into_lines(self) -> Vec<Bytes> {
        self.lines
    }
}
