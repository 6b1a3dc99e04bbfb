pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tools;

pub use errors::{ErrorInfo, ProviderError};
pub use events::{AgentSignal, EventKind};
pub use ids::{ChatId, EventId, TaskId, ToolCallId};
pub use messages::{FinishReason, Message, Role};
pub use provider::{ChunkStream, ParsedResponse, Provider, ProviderRequest};
pub use stream::StreamChunk;
pub use tools::{Tool, ToolArguments, ToolCallRequest, ToolDefinition, ToolError, ToolResult};
