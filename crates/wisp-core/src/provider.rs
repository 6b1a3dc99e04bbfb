use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::ProviderError;
use crate::messages::Message;
use crate::stream::StreamChunk;
use crate::tools::{ToolCallRequest, ToolDefinition};

/// The complete payload handed to a provider for one round. Stream mode is
/// not part of the payload; it is chosen by calling `complete` or `stream`.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl ProviderRequest {
    /// An empty request (useful for testing).
    pub fn empty() -> Self {
        Self {
            model: String::new(),
            system: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }
}

/// A provider response parsed wholesale (non-streaming path).
#[derive(Clone, Debug, Default)]
pub struct ParsedResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: Option<String>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Trait implemented by each provider adapter.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Perform a non-streaming request and parse the response wholesale.
    async fn complete(&self, request: &ProviderRequest) -> Result<ParsedResponse, ProviderError>;

    /// Perform a streaming request, yielding typed chunks over time.
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, ProviderError>;
}
