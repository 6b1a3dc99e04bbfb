use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, ToolCallId};
use crate::messages::FinishReason;

/// Kinds of persisted telemetry events.
///
/// Spans the message, tool, thinking, api, stream, and system phases of a
/// turn. Records are append-only; eviction may lossily compress their `data`
/// payload but never changes the kind.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // message
    UserMessage,
    AssistantMessage,
    ToolMessage,
    // tool
    ToolCallStarted,
    ToolCallCompleted,
    ToolCallFailed,
    // thinking
    ThinkingStarted,
    ThinkingUpdated,
    ThinkingEnded,
    // api
    ApiRequest,
    ApiResponse,
    ApiError,
    // stream
    StreamStarted,
    StreamCompleted,
    StreamError,
    // system
    ChatCreated,
    ChatCleared,
    TaskCreated,
    TaskStatusChanged,
    SystemError,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&s)
    }
}

/// Live signals emitted while a turn runs.
///
/// These are the in-process observer feed, not to be confused with the
/// persisted event log. Tokens and thinking updates are forwarded the moment
/// they arrive.
#[derive(Clone, Debug)]
pub enum AgentSignal {
    TokenDelta {
        chat_id: ChatId,
        delta: String,
    },
    ThinkingUpdate {
        chat_id: ChatId,
        status: String,
    },
    ToolStarted {
        chat_id: ChatId,
        tool_call_id: ToolCallId,
        tool_name: String,
    },
    ToolFinished {
        chat_id: ChatId,
        tool_call_id: ToolCallId,
        tool_name: String,
        success: bool,
        duration_ms: u64,
    },
    TurnCompleted {
        chat_id: ChatId,
        finish_reason: FinishReason,
    },
}

impl AgentSignal {
    pub fn chat_id(&self) -> &ChatId {
        match self {
            Self::TokenDelta { chat_id, .. }
            | Self::ThinkingUpdate { chat_id, .. }
            | Self::ToolStarted { chat_id, .. }
            | Self::ToolFinished { chat_id, .. }
            | Self::TurnCompleted { chat_id, .. } => chat_id,
        }
    }
}
