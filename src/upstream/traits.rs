//! Upstream trait definitions and the values that cross them.

use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;

use crate::error::{ApiError, UpstreamError};

/// A text-generation service that turns a prompt into a token stream.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Get the backend name for metrics/logging.
    fn name(&self) -> &'static str;

    /// Open a token stream for the given prompt.
    ///
    /// Returns once the upstream has answered; tokens are read lazily
    /// from the returned source.
    async fn open(&self, prompt: &Prompt) -> Result<TokenSource, UpstreamError>;

    /// Health check for the backend.
    async fn health_check(&self) -> Result<(), UpstreamError>;
}

/// A caller-supplied prompt. Never empty or whitespace-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    /// Validate raw input. The text is kept as given; only emptiness is
    /// judged on the trimmed form.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        if raw.trim().is_empty() {
            return Err(ApiError::BadRequest("Message is required".to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One line of upstream output with surrounding whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Build a token from a raw upstream line (terminator included or not).
    pub fn from_line(line: &str) -> Self {
        Self(line.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stream of tokens from a backend.
pub type TokenSource = Box<dyn TokenSourceTrait>;

/// Trait for token sources. `None` means the upstream reached end of stream.
pub trait TokenSourceTrait: Send {
    /// Get the next token.
    #[allow(clippy::type_complexity)]
    fn next_token(
        &mut self,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Result<Token, UpstreamError>>> + Send + '_>>;
}

/// Simple vector-based token source for tests and the mock backend.
pub struct VecTokenSource {
    tokens: std::vec::IntoIter<Token>,
    delay: Option<std::time::Duration>,
    fail_with: Option<String>,
}

impl VecTokenSource {
    pub fn new(tokens: Vec<Token>, delay: Option<std::time::Duration>) -> Self {
        Self {
            tokens: tokens.into_iter(),
            delay,
            fail_with: None,
        }
    }

    /// End the stream with a read error instead of EOF.
    pub fn failing_after(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }
}

impl TokenSourceTrait for VecTokenSource {
    fn next_token(
        &mut self,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Result<Token, UpstreamError>>> + Send + '_>>
    {
        let delay = self.delay;
        let next = match self.tokens.next() {
            Some(token) => Some(Ok(token)),
            None => self.fail_with.take().map(|m| Err(UpstreamError::Stream(m))),
        };

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            next
        })
    }
}
