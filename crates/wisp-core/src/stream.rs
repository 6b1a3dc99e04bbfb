use crate::errors::ProviderError;
use crate::tools::ToolCallRequest;

/// Typed chunks yielded by a streaming provider response.
///
/// Ordering contract: zero or more `Token` / `Thinking` / `ToolCall` chunks,
/// then exactly one terminal `Complete` or `Error`.
#[derive(Clone, Debug)]
pub enum StreamChunk {
    /// A fragment of assistant text, forwarded to observers unbuffered.
    Token { text: String },
    /// A model thinking update (free-form status text).
    Thinking { status: String },
    /// A fully assembled tool call request.
    ToolCall { request: ToolCallRequest },
    /// Terminal: the finished assistant content.
    Complete { content: String },
    /// Terminal: the stream failed.
    Error { error: ProviderError },
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
