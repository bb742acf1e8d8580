//! Mock backend for testing and demos.
//!
//! Simulates the generation service by replaying a token list.

use async_trait::async_trait;
use std::time::Duration;

use super::traits::{GenerationBackend, Prompt, Token, TokenSource, VecTokenSource};
use crate::error::UpstreamError;

/// Mock backend that replays tokens with a fixed delay.
pub struct MockUpstream {
    /// Fixed tokens; `None` produces a canned reply built from the prompt.
    tokens: Option<Vec<String>>,
    /// Delay before each token.
    token_delay: Duration,
}

impl MockUpstream {
    /// Create a new mock backend with the canned reply.
    pub fn new() -> Self {
        Self {
            tokens: None,
            token_delay: Duration::from_millis(50),
        }
    }

    /// Create with custom token delay.
    pub fn with_delay(token_delay: Duration) -> Self {
        Self {
            tokens: None,
            token_delay,
        }
    }

    /// Replay exactly `tokens` for every prompt.
    pub fn with_tokens<I, S>(tokens: I, token_delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: Some(tokens.into_iter().map(Into::into).collect()),
            token_delay,
        }
    }

    fn canned_reply(prompt: &Prompt) -> Vec<String> {
        let preview: String = prompt.as_str().trim().chars().take(100).collect();
        let mut lines = vec![format!("You said: {}", preview)];
        lines.extend(
            "An increasing sequence: one, two, three, four, five"
                .split_whitespace()
                .map(str::to_string),
        );
        lines
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockUpstream {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open(&self, prompt: &Prompt) -> Result<TokenSource, UpstreamError> {
        let lines = match &self.tokens {
            Some(tokens) => tokens.clone(),
            None => Self::canned_reply(prompt),
        };
        let tokens = lines.iter().map(|l| Token::from_line(l)).collect();

        let delay = (!self.token_delay.is_zero()).then_some(self.token_delay);
        Ok(Box::new(VecTokenSource::new(tokens, delay)))
    }

    async fn health_check(&self) -> Result<(), UpstreamError> {
        Ok(())
    }
}
