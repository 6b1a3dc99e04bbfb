//! Server-sent-events plumbing: raw byte chunks in, typed `StreamChunk`s out.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tracing::warn;

use wisp_core::errors::ProviderError;
use wisp_core::stream::StreamChunk;

use crate::wire::{ChatStreamPayload, ToolCallAccumulator};

/// Extract `data:` payloads from a block of SSE lines.
pub fn parse_sse_lines(block: &str) -> Vec<String> {
    block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|payload| payload.trim_start().to_string())
        .collect()
}

/// Stateful translator from SSE `data:` payloads to `StreamChunk`s.
///
/// Text deltas pass through immediately; tool-call fragments accumulate until
/// the `[DONE]` sentinel, which flushes them ahead of the terminal
/// `Complete` chunk.
pub struct SseParser {
    content: String,
    accumulator: ToolCallAccumulator,
    finished: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            accumulator: ToolCallAccumulator::new(),
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn parse_payload(&mut self, data: &str) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }
        if data == "[DONE]" {
            return self.finish();
        }

        let payload: ChatStreamPayload = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "skipping unparseable stream payload");
                return Vec::new();
            }
        };

        let mut chunks = Vec::new();
        for choice in &payload.choices {
            if let Some(text) = &choice.delta.reasoning_content {
                if !text.is_empty() {
                    chunks.push(StreamChunk::Thinking {
                        status: text.clone(),
                    });
                }
            }
            if let Some(text) = &choice.delta.content {
                if !text.is_empty() {
                    self.content.push_str(text);
                    chunks.push(StreamChunk::Token { text: text.clone() });
                }
            }
            if let Some(deltas) = &choice.delta.tool_calls {
                for delta in deltas {
                    self.accumulator.push(delta);
                }
            }
        }
        chunks
    }

    /// Flush accumulated state into tool-call chunks plus the terminal
    /// `Complete`.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut chunks: Vec<StreamChunk> = self
            .accumulator
            .finish()
            .into_iter()
            .map(|request| StreamChunk::ToolCall { request })
            .collect();
        chunks.push(StreamChunk::Complete {
            content: std::mem::take(&mut self.content),
        });
        chunks
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a raw byte stream and yields `StreamChunk`s as SSE blocks complete.
pub struct SseChunkStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: String,
    pending: Vec<StreamChunk>,
    done: bool,
}

impl SseChunkStream {
    pub fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: String::new(),
            pending: Vec::new(),
            done: false,
        }
    }

    fn drain_buffer(&mut self) {
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos + 2].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();
            for payload in parse_sse_lines(&block) {
                self.pending.extend(self.parser.parse_payload(&payload));
            }
        }
    }
}

impl Stream for SseChunkStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if !self.pending.is_empty() {
                return Poll::Ready(Some(self.pending.remove(0)));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes);
                    self.buffer.push_str(&text);
                    self.drain_buffer();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(StreamChunk::Error {
                        error: ProviderError::StreamInterrupted(e.to_string()),
                    }));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    // Process any trailing partial block, then flush the
                    // parser so the terminal chunk is never lost even when
                    // the server omits the [DONE] sentinel.
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        for payload in parse_sse_lines(&remaining) {
                            let chunks = self.parser.parse_payload(&payload);
                            self.pending.extend(chunks);
                        }
                    }
                    if !self.parser.is_finished() {
                        let chunks = self.parser.finish();
                        self.pending.extend(chunks);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn delta(json: &str) -> String {
        format!(r#"{{"choices":[{{"delta":{json}}}]}}"#)
    }

    #[test]
    fn parse_sse_lines_extracts_data_payloads() {
        let block = "event: message\ndata: {\"a\":1}\ndata: [DONE]\n\n";
        let payloads = parse_sse_lines(block);
        assert_eq!(payloads, vec![r#"{"a":1}"#.to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn parser_emits_tokens_and_accumulates_content() {
        let mut parser = SseParser::new();
        let chunks = parser.parse_payload(&delta(r#"{"content":"Hel"}"#));
        assert!(matches!(&chunks[0], StreamChunk::Token { text } if text == "Hel"));
        parser.parse_payload(&delta(r#"{"content":"lo"}"#));

        let terminal = parser.parse_payload("[DONE]");
        assert_eq!(terminal.len(), 1);
        assert!(matches!(&terminal[0], StreamChunk::Complete { content } if content == "Hello"));
    }

    #[test]
    fn parser_emits_thinking_updates() {
        let mut parser = SseParser::new();
        let chunks = parser.parse_payload(&delta(r#"{"reasoning_content":"planning"}"#));
        assert!(matches!(&chunks[0], StreamChunk::Thinking { status } if status == "planning"));
    }

    #[test]
    fn parser_flushes_tool_calls_before_complete() {
        let mut parser = SseParser::new();
        parser.parse_payload(&delta(
            r#"{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"calculator","arguments":"{\"expr\":"}}]}"#,
        ));
        parser.parse_payload(&delta(
            r#"{"tool_calls":[{"index":0,"function":{"arguments":"\"2+2\"}"}}]}"#,
        ));

        let terminal = parser.parse_payload("[DONE]");
        assert_eq!(terminal.len(), 2);
        assert!(
            matches!(&terminal[0], StreamChunk::ToolCall { request } if request.name == "calculator")
        );
        assert!(matches!(&terminal[1], StreamChunk::Complete { .. }));
    }

    #[test]
    fn parser_skips_garbage_payloads() {
        let mut parser = SseParser::new();
        assert!(parser.parse_payload("{broken").is_empty());
        assert!(!parser.is_finished());
    }

    #[test]
    fn parser_finish_is_idempotent() {
        let mut parser = SseParser::new();
        parser.parse_payload(&delta(r#"{"content":"x"}"#));
        assert_eq!(parser.parse_payload("[DONE]").len(), 1);
        assert!(parser.parse_payload("[DONE]").is_empty());
        assert!(parser.finish().is_empty());
    }

    #[tokio::test]
    async fn chunk_stream_reassembles_split_blocks() {
        let blocks = vec![
            Ok(bytes::Bytes::from(format!("data: {}\n", delta(r#"{"content":"Hel"}"#)))),
            Ok(bytes::Bytes::from(format!("\ndata: {}\n\n", delta(r#"{"content":"lo"}"#)))),
            Ok(bytes::Bytes::from("data: [DONE]\n\n")),
        ];
        let stream = SseChunkStream::new(futures::stream::iter(blocks));
        let chunks: Vec<StreamChunk> = stream.collect().await;

        assert_eq!(chunks.len(), 3);
        assert!(matches!(&chunks[0], StreamChunk::Token { text } if text == "Hel"));
        assert!(matches!(&chunks[1], StreamChunk::Token { text } if text == "lo"));
        assert!(matches!(&chunks[2], StreamChunk::Complete { content } if content == "Hello"));
    }

    #[tokio::test]
    async fn chunk_stream_yields_as_data_arrives() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, reqwest::Error>>(16);
        let mut stream = Box::pin(SseChunkStream::new(
            tokio_stream::wrappers::ReceiverStream::new(rx),
        ));

        tx.send(Ok(bytes::Bytes::from(format!(
            "data: {}\n\n",
            delta(r#"{"content":"first"}"#)
        ))))
        .await
        .unwrap();
        let chunk = stream.next().await.unwrap();
        assert!(matches!(chunk, StreamChunk::Token { text } if text == "first"));

        tx.send(Ok(bytes::Bytes::from("data: [DONE]\n\n"))).await.unwrap();
        let chunk = stream.next().await.unwrap();
        assert!(matches!(chunk, StreamChunk::Complete { content } if content == "first"));

        drop(tx);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn chunk_stream_completes_without_done_sentinel() {
        let blocks = vec![Ok(bytes::Bytes::from(format!(
            "data: {}\n\n",
            delta(r#"{"content":"partial"}"#)
        )))];
        let stream = SseChunkStream::new(futures::stream::iter(blocks));
        let chunks: Vec<StreamChunk> = stream.collect().await;

        assert!(matches!(
            chunks.last(),
            Some(StreamChunk::Complete { content }) if content == "partial"
        ));
    }
}
