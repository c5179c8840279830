//! Incremental response decoding for streaming completions.
//!
//! The backend answers a streaming request with newline-delimited event lines.
//! Lines carrying the `data: ` prefix hold one JSON [`StreamFragment`] each,
//! and a `[DONE]` payload ends the stream.

use crate::error::Result;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Prefix of lines that carry a payload.
pub const DATA_PREFIX: &str = "data: ";

/// Payload that terminates the stream.
pub const DONE_MARKER: &str = "[DONE]";

/// One incremental fragment of a streaming completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFragment {
    /// Unique identifier for this completion.
    #[serde(default)]
    pub id: String,
    /// Object type (usually "chat.completion.chunk").
    #[serde(default)]
    pub object: String,
    /// Unix timestamp of when the fragment was created.
    #[serde(default)]
    pub created: i64,
    /// Model used for the completion.
    #[serde(default)]
    pub model: String,
    /// Choices carried by this fragment.
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

impl StreamFragment {
    /// Get the content delta from the first choice.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .unwrap_or("")
    }

    /// Get the finish reason if present.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
    }
}

/// A choice in a streaming fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    /// Index of this choice.
    #[serde(default)]
    pub index: u32,
    /// The delta content.
    #[serde(default)]
    pub delta: StreamDelta,
    /// Reason for completion (only in the final fragment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Role of the message (only in the first fragment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// What a single protocol line means.
#[derive(Debug)]
enum LineEvent {
    /// Blank, keep-alive, non-data or undecodable line.
    Skip,
    /// Terminator seen.
    Done,
    /// A decoded fragment.
    Fragment(StreamFragment),
}

fn decode_line(raw: &[u8]) -> LineEvent {
    let Ok(line) = std::str::from_utf8(raw) else {
        debug!(len = raw.len(), "Skipping stream line with invalid UTF-8");
        return LineEvent::Skip;
    };

    let line = line.trim_end();
    if line.is_empty() {
        return LineEvent::Skip;
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineEvent::Skip;
    };

    if payload == DONE_MARKER {
        return LineEvent::Done;
    }

    match serde_json::from_str::<StreamFragment>(payload) {
        Ok(fragment) => LineEvent::Fragment(fragment),
        Err(e) => {
            // Backends occasionally emit partial or malformed lines
            debug!(error = %e, data = payload, "Failed to parse stream fragment");
            LineEvent::Skip
        }
    }
}

/// Decode a byte body into fragments.
///
/// The returned stream ends at the terminator, at the end of the body, or
/// after yielding the first transport error.
pub fn decode_fragments<S>(body: S) -> impl Stream<Item = Result<StreamFragment>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    async_stream::stream! {
        let mut body = std::pin::pin!(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            buffer.extend_from_slice(&bytes);

            while let Some(end) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=end).collect();
                match decode_line(&line) {
                    LineEvent::Fragment(fragment) => yield Ok(fragment),
                    LineEvent::Done => return,
                    LineEvent::Skip => {}
                }
            }
        }

        // Last line without a trailing newline
        if let LineEvent::Fragment(fragment) = decode_line(&buffer) {
            yield Ok(fragment);
        }
    }
}

/// A lazy, single-consumption stream of completion fragments.
///
/// The stream holds its backend resources until it finishes or is dropped;
/// once it yields `None` or an error it releases them and stays finished.
pub struct FragmentStream {
    inner: Option<BoxStream<'static, Result<StreamFragment>>>,
}

impl FragmentStream {
    /// Wrap a fragment stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StreamFragment>> + Send + 'static,
    {
        Self {
            inner: Some(stream.boxed()),
        }
    }

    /// Concatenate the content of every remaining fragment.
    pub async fn collect_content(mut self) -> Result<String> {
        let mut content = String::new();
        while let Some(fragment) = self.next().await {
            content.push_str(fragment?.content());
        }
        Ok(content)
    }

    /// Check if the stream has finished.
    pub fn is_done(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for FragmentStream {
    type Item = Result<StreamFragment>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(fragment))) => Poll::Ready(Some(Ok(fragment))),
            Poll::Ready(Some(Err(e))) => {
                self.inner = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.inner = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream")
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use futures::stream;

    fn fragment_line(id: &str, content: &str) -> String {
        format!(
            r#"data: {{"id":"{id}","object":"chat.completion.chunk","created":1,"model":"gpt-3.5-turbo","choices":[{{"index":0,"delta":{{"content":"{content}"}},"finish_reason":null}}]}}"#
        )
    }

    fn body_from_chunks(chunks: Vec<String>) -> impl Stream<Item = Result<Bytes>> + Send {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn decode_all(chunks: Vec<String>) -> Vec<Result<StreamFragment>> {
        decode_fragments(body_from_chunks(chunks)).collect().await
    }

    #[tokio::test]
    async fn test_stops_at_done_marker() {
        let body = format!(
            "{}\n\ndata: [DONE]\n{}\n",
            fragment_line("a", "Hello"),
            fragment_line("b", "ignored")
        );

        let fragments = decode_all(vec![body]).await;
        assert_eq!(fragments.len(), 1);
        let first = fragments[0].as_ref().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(first.content(), "Hello");
    }

    #[tokio::test]
    async fn test_skips_malformed_line() {
        let body = format!(
            "{}\ndata: {{\"id\": broken\n{}\ndata: [DONE]\n",
            fragment_line("a", "one"),
            fragment_line("b", "two")
        );

        let fragments = decode_all(vec![body]).await;
        let ids: Vec<_> = fragments
            .iter()
            .map(|f| f.as_ref().unwrap().id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_skips_non_data_lines() {
        let body = format!(
            ": keep-alive\nevent: message\nid: 7\n{}\r\n\r\ndata: [DONE]\r\n",
            fragment_line("a", "x")
        );

        let fragments = decode_all(vec![body]).await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap().content(), "x");
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let line = fragment_line("a", "你好");
        let bytes = format!("{line}\ndata: [DONE]\n").into_bytes();

        // Split inside the multi-byte characters as well as inside the prefix
        let chunks: Vec<Result<Bytes>> = bytes
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let fragments: Vec<_> = decode_fragments(stream::iter(chunks)).collect().await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap().content(), "你好");
    }

    #[tokio::test]
    async fn test_end_of_body_without_terminator() {
        // The final line has no trailing newline
        let body = format!("{}\n{}", fragment_line("a", "1"), fragment_line("b", "2"));

        let fragments = decode_all(vec![body]).await;
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].as_ref().unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from(format!("{}\n", fragment_line("a", "1")))),
            Err(GatewayError::transport("connection reset")),
            Ok(Bytes::from(format!("{}\n", fragment_line("b", "2")))),
        ];

        let fragments: Vec<_> = decode_fragments(stream::iter(chunks)).collect().await;
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].is_ok());
        assert!(matches!(fragments[1], Err(GatewayError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_fragment_stream_finishes_after_error() {
        let items: Vec<Result<StreamFragment>> = vec![
            Err(GatewayError::transport("boom")),
            Err(GatewayError::transport("never seen")),
        ];
        let mut stream = FragmentStream::new(stream::iter(items));

        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.is_done());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_content() {
        let body = format!(
            "{}\n{}\ndata: [DONE]\n",
            fragment_line("a", "Hello, "),
            fragment_line("a", "world!")
        );
        let stream = FragmentStream::new(decode_fragments(body_from_chunks(vec![body])));

        assert_eq!(stream.collect_content().await.unwrap(), "Hello, world!");
    }

    #[test]
    fn test_fragment_finish_reason() {
        let json = r#"{"id":"a","model":"m","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        let fragment: StreamFragment = serde_json::from_str(json).unwrap();
        assert_eq!(fragment.content(), "");
        assert_eq!(fragment.finish_reason(), Some("stop"));
    }
}
