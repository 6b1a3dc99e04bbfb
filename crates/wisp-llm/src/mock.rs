use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use wisp_core::errors::ProviderError;
use wisp_core::ids::ToolCallId;
use wisp_core::provider::{ChunkStream, ParsedResponse, Provider, ProviderRequest};
use wisp_core::stream::StreamChunk;
use wisp_core::tools::{ToolArguments, ToolCallRequest};

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// A wholesale-parsed response.
    Complete(ParsedResponse),
    /// A scripted chunk sequence.
    Stream(Vec<StreamChunk>),
    /// Fail the call itself.
    Error(ProviderError),
}

impl MockResponse {
    /// Convenience: a plain text answer.
    pub fn text(text: &str) -> Self {
        Self::Complete(ParsedResponse {
            content: text.to_string(),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".into()),
        })
    }

    /// Convenience: a response requesting one tool call.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::Complete(ParsedResponse {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments: ToolArguments::structured(arguments),
            }],
            finish_reason: Some("tool_calls".into()),
        })
    }

    /// Convenience: a token-by-token text stream.
    pub fn stream_text(text: &str) -> Self {
        let mut chunks: Vec<StreamChunk> = text
            .split_inclusive(' ')
            .map(|piece| StreamChunk::Token {
                text: piece.to_string(),
            })
            .collect();
        chunks.push(StreamChunk::Complete {
            content: text.to_string(),
        });
        Self::Stream(chunks)
    }

    /// Convenience: a stream that requests one tool call.
    pub fn stream_tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::Stream(vec![
            StreamChunk::ToolCall {
                request: ToolCallRequest {
                    id: ToolCallId::new(),
                    name: name.to_string(),
                    arguments: ToolArguments::structured(arguments),
                },
            },
            StreamChunk::Complete {
                content: String::new(),
            },
        ])
    }
}

/// Mock provider that plays back scripted responses in order.
///
/// Both `complete` and `stream` draw from the same script: a `Complete`
/// entry is rendered as chunks when streamed, and a `Stream` entry is folded
/// into a `ParsedResponse` when completed, so tests can exercise either path
/// with one script.
pub struct MockProvider {
    script: Mutex<VecDeque<MockResponse>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of provider calls made so far (complete + stream).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_response(&self) -> Result<MockResponse, ProviderError> {
        let idx = self.calls.fetch_add(1, Ordering::Relaxed);
        self.script.lock().pop_front().ok_or_else(|| {
            ProviderError::Programming(format!("MockProvider: no response scripted for call {idx}"))
        })
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, _request: &ProviderRequest) -> Result<ParsedResponse, ProviderError> {
        match self.next_response()? {
            MockResponse::Complete(parsed) => Ok(parsed),
            MockResponse::Stream(chunks) => Ok(fold_chunks(chunks)?),
            MockResponse::Error(e) => Err(e),
        }
    }

    async fn stream(&self, _request: &ProviderRequest) -> Result<ChunkStream, ProviderError> {
        match self.next_response()? {
            MockResponse::Complete(parsed) => Ok(Box::pin(stream::iter(render_chunks(parsed)))),
            MockResponse::Stream(chunks) => Ok(Box::pin(stream::iter(chunks))),
            MockResponse::Error(e) => Err(e),
        }
    }
}

fn fold_chunks(chunks: Vec<StreamChunk>) -> Result<ParsedResponse, ProviderError> {
    let mut parsed = ParsedResponse::default();
    for chunk in chunks {
        match chunk {
            StreamChunk::Token { .. } | StreamChunk::Thinking { .. } => {}
            StreamChunk::ToolCall { request } => parsed.tool_calls.push(request),
            StreamChunk::Complete { content } => parsed.content = content,
            StreamChunk::Error { error } => return Err(error),
        }
    }
    parsed.finish_reason = Some(if parsed.tool_calls.is_empty() {
        "stop".into()
    } else {
        "tool_calls".into()
    });
    Ok(parsed)
}

fn render_chunks(parsed: ParsedResponse) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    if !parsed.content.is_empty() {
        chunks.push(StreamChunk::Token {
            text: parsed.content.clone(),
        });
    }
    for request in parsed.tool_calls {
        chunks.push(StreamChunk::ToolCall { request });
    }
    chunks.push(StreamChunk::Complete {
        content: parsed.content,
    });
    chunks
}
