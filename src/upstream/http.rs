//! HTTP line-stream backend.
//!
//! Issues `GET <url>?message=<prompt>` and reads the response body as
//! newline-delimited tokens until the upstream closes the connection.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::{Client, Url};
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

use super::traits::{GenerationBackend, Prompt, Token, TokenSource, TokenSourceTrait};
use crate::error::UpstreamError;

type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Default cap on a single upstream line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Upstream reached over plain HTTP.
pub struct HttpUpstream {
    client: Client,
    url: Url,
    read_timeout: Duration,
    max_line_bytes: usize,
}

impl HttpUpstream {
    /// Create a new HTTP upstream. Fails if `url` is not an absolute URL.
    pub fn new(client: Client, url: &str, read_timeout: Duration) -> Result<Self, UpstreamError> {
        let url = Url::parse(url)
            .map_err(|e| UpstreamError::Config(format!("Invalid upstream URL {}: {}", url, e)))?;

        Ok(Self {
            client,
            url,
            read_timeout,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        })
    }

    /// Reject upstream lines longer than `max` bytes.
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }
}

#[async_trait]
impl GenerationBackend for HttpUpstream {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(&self, prompt: &Prompt) -> Result<TokenSource, UpstreamError> {
        tracing::debug!(
            url = %self.url,
            prompt_len = prompt.len(),
            "Sending request to upstream"
        );

        let response = self
            .client
            .get(self.url.clone())
            .query(&[("message", prompt.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        let body: BodyStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(io::Error::other)),
        );
        let reader = StreamReader::new(body);

        Ok(Box::new(LineTokenSource::new(
            reader,
            self.read_timeout,
            self.max_line_bytes,
        )))
    }

    async fn health_check(&self) -> Result<(), UpstreamError> {
        let mut url = self.url.clone();
        url.set_path("/health");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status {
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

/// One line of the upstream body, without its `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Terminated(String),
    /// Bytes left at EOF with no trailing newline.
    Unterminated(String),
}

/// Splits the upstream body on `\n`.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected, so one
/// bad line does not end the stream. A line longer than `max_length` is an
/// `InvalidData` error.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Where the newline search resumes in the buffer.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    fn too_long(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {} bytes", self.max_length),
        )
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Line>> {
        let from = self.next_index.min(buf.len());
        match buf[from..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = from + offset;
                self.next_index = 0;
                if end > self.max_length {
                    return Err(self.too_long());
                }
                let line = buf.split_to(end + 1);
                Ok(Some(Line::Terminated(
                    String::from_utf8_lossy(&line[..end]).into_owned(),
                )))
            }
            None if buf.len() > self.max_length => Err(self.too_long()),
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Line>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let rest = buf.split();
        Ok(Some(Line::Unterminated(
            String::from_utf8_lossy(&rest).into_owned(),
        )))
    }
}

/// Reads newline-delimited tokens from a byte stream.
///
/// Each read is bounded by `read_timeout`. The source is fused: after EOF
/// or the first error it only returns `None`.
pub struct LineTokenSource<R> {
    lines: FramedRead<R, LineCodec>,
    read_timeout: Duration,
    finished: bool,
}

impl<R> LineTokenSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, read_timeout: Duration, max_line_bytes: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LineCodec::new(max_line_bytes)),
            read_timeout,
            finished: false,
        }
    }

    async fn read_token(&mut self) -> Option<Result<Token, UpstreamError>> {
        if self.finished {
            return None;
        }

        let next = tokio::time::timeout(self.read_timeout, self.lines.next()).await;

        match next {
            Err(_) => {
                self.finished = true;
                Some(Err(UpstreamError::Timeout))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Ok(Some(Err(e))) => {
                self.finished = true;
                Some(Err(UpstreamError::Stream(e.to_string())))
            }
            Ok(Some(Ok(Line::Terminated(text)))) => Some(Ok(Token::from_line(&text))),
            Ok(Some(Ok(Line::Unterminated(text)))) => {
                self.finished = true;
                let token = Token::from_line(&text);
                if token.is_empty() {
                    None
                } else {
                    Some(Ok(token))
                }
            }
        }
    }
}

impl<R> TokenSourceTrait for LineTokenSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn next_token(
        &mut self,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Result<Token, UpstreamError>>> + Send + '_>>
    {
        Box::pin(self.read_token())
    }
}
