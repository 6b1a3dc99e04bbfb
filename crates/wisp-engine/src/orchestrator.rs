use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::{error, instrument, warn};

use wisp_core::errors::{ErrorInfo, ProviderError};
use wisp_core::events::{AgentSignal, EventKind};
use wisp_core::ids::ChatId;
use wisp_core::messages::{FinishReason, Message};
use wisp_core::provider::{Provider, ProviderRequest};
use wisp_core::stream::StreamChunk;
use wisp_core::tools::{ToolCallRequest, ToolResult};
use wisp_store::tasks::{Task, TaskPatch, TaskStatus};
use wisp_store::{ChatHistoryStore, EventLog, TaskLedger};

use crate::config::AgentConfig;
use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::status::{ThinkingStatus, ThinkingStatusTracker};
use crate::validate;

/// Caller-facing options for one turn.
#[derive(Clone, Debug, Default)]
pub struct TurnOptions {
    /// Continue an existing conversation, or leave unset to start a new one.
    pub chat_id: Option<ChatId>,
    /// Override the configured tool-round ceiling.
    pub max_tool_rounds: Option<u32>,
}

/// What a completed turn hands back. Always renderable: conversational
/// failures carry a human-readable `content` alongside the classified error.
#[derive(Clone, Debug)]
pub struct TurnResult {
    pub chat_id: ChatId,
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
    pub error: Option<ErrorInfo>,
}

/// Ephemeral per-turn loop state. Rounds advance in an explicit loop rather
/// than recursive re-entry, which makes the ceiling a plain guard.
#[derive(Clone, Debug)]
struct RoundState {
    chat_id: ChatId,
    round: u32,
    ceiling: u32,
}

impl RoundState {
    fn exhausted(&self) -> bool {
        self.round >= self.ceiling
    }

    fn is_follow_up(&self) -> bool {
        self.round > 0
    }
}

enum RoundOutcome {
    /// The model answered without requesting tools; the loop is done.
    Answered(String),
    /// Tools ran and their results are in history; run another round.
    ToolsExecuted,
}

/// Turns one user utterance into a finished conversational turn: validation,
/// context assembly, the provider call, and as many tool rounds as the model
/// requests, bounded by the round ceiling.
///
/// At most one turn may be in flight per chat id. The durable stores are
/// whole-blob read-modify-write, so two concurrent turns on one conversation
/// can lose updates (last writer wins); callers are expected to await
/// completion before starting the next turn.
pub struct ConversationOrchestrator {
    config: AgentConfig,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    tasks: Arc<TaskLedger>,
    events: Arc<EventLog>,
    history: Arc<ChatHistoryStore>,
    status: ThinkingStatusTracker,
    signals: broadcast::Sender<AgentSignal>,
    /// In-session message lists; the context source when durable history is
    /// disabled, and the copy that survives a lost durable write.
    session: Mutex<HashMap<ChatId, Vec<Message>>>,
}

impl ConversationOrchestrator {
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        tasks: Arc<TaskLedger>,
        events: Arc<EventLog>,
        history: Arc<ChatHistoryStore>,
    ) -> Self {
        let (signals, _) = broadcast::channel(256);
        Self {
            config,
            provider,
            tools,
            tasks,
            events,
            history,
            status: ThinkingStatusTracker::new(),
            signals,
            session: Mutex::new(HashMap::new()),
        }
    }

    /// Live token / thinking / tool signals for this orchestrator.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<AgentSignal> {
        self.signals.subscribe()
    }

    /// Watch the single-slot thinking status.
    pub fn watch_status(&self) -> watch::Receiver<ThinkingStatus> {
        self.status.subscribe()
    }

    pub fn thinking_status(&self) -> ThinkingStatus {
        self.status.current()
    }

    /// Run one conversational turn.
    ///
    /// Recoverable failures come back as a `TurnResult` with
    /// `finish_reason: Error` and readable content; only fatal errors on a
    /// fresh (non-follow-up) round surface as `Err`.
    #[instrument(skip(self, user_text, options), fields(chars = user_text.chars().count()))]
    pub async fn turn(
        &self,
        user_text: &str,
        options: TurnOptions,
    ) -> Result<TurnResult, EngineError> {
        let chat_id = options.chat_id.clone().unwrap_or_else(ChatId::new);

        // Preconditions, checked before any side effect.
        if let Err(e) = self.config.validate() {
            return Ok(self.error_result(chat_id, EngineError::Config(e)));
        }
        if let Err(e) = validate::validate_user_text(user_text) {
            return Ok(self.error_result(chat_id, EngineError::Validation(e)));
        }

        let ceiling = options.max_tool_rounds.unwrap_or(self.config.max_tool_rounds);
        let mut state = RoundState {
            chat_id,
            round: 0,
            ceiling,
        };
        let mut pending_user = Some(user_text.to_string());

        loop {
            if state.exhausted() {
                // Dead-man's switch against a model that never stops
                // requesting tools: bail before the next network call.
                warn!(chat_id = %state.chat_id, ceiling = state.ceiling, "tool round ceiling reached");
                self.status.set(ThinkingStatus::Idle);
                self.signal(AgentSignal::TurnCompleted {
                    chat_id: state.chat_id.clone(),
                    finish_reason: FinishReason::MaxRounds,
                });
                return Ok(TurnResult {
                    chat_id: state.chat_id.clone(),
                    content: format!(
                        "Stopped after {} tool rounds without a final answer.",
                        state.ceiling
                    ),
                    tool_calls: Vec::new(),
                    finish_reason: FinishReason::MaxRounds,
                    error: None,
                });
            }

            match self.run_round(&state, pending_user.take()).await {
                Ok(RoundOutcome::Answered(content)) => {
                    self.status.set(ThinkingStatus::Idle);
                    self.signal(AgentSignal::TurnCompleted {
                        chat_id: state.chat_id.clone(),
                        finish_reason: FinishReason::Stop,
                    });
                    return Ok(TurnResult {
                        chat_id: state.chat_id.clone(),
                        content,
                        tool_calls: Vec::new(),
                        finish_reason: FinishReason::Stop,
                        error: None,
                    });
                }
                Ok(RoundOutcome::ToolsExecuted) => {
                    state.round += 1;
                }
                Err(e) => {
                    self.status.set(ThinkingStatus::Idle);
                    self.signal(AgentSignal::TurnCompleted {
                        chat_id: state.chat_id.clone(),
                        finish_reason: FinishReason::Error,
                    });
                    // Fatal errors propagate, but only on a fresh turn: once
                    // tool results are in history the conversation is worth
                    // more than the exception.
                    if e.is_fatal() && !state.is_follow_up() {
                        return Err(e);
                    }
                    return Ok(self.error_result(state.chat_id.clone(), e));
                }
            }
        }
    }

    /// Explicitly clear one conversation's durable and in-session history.
    pub fn clear_chat(&self, chat_id: &ChatId) -> Result<bool, EngineError> {
        self.session.lock().remove(chat_id);
        let existed = self.history.clear_chat(chat_id)?;
        if existed {
            self.record_event(EventKind::ChatCleared, chat_id, json!({}));
        }
        Ok(existed)
    }

    /// One provider round: context in, assistant message out, tools executed.
    /// Errors are caught once here (logged, reflected on the task), then
    /// classified by the caller.
    async fn run_round(
        &self,
        state: &RoundState,
        user_text: Option<String>,
    ) -> Result<RoundOutcome, EngineError> {
        self.status.set(ThinkingStatus::Preparing);

        let title = if state.is_follow_up() {
            format!("tool follow-up (round {})", state.round)
        } else {
            "conversation turn".to_string()
        };
        let task = match self.tasks.append(&title, None, Some(state.chat_id.clone())) {
            Ok(task) => {
                self.record_event(
                    EventKind::TaskCreated,
                    &state.chat_id,
                    json!({"task_id": task.id, "title": task.title}),
                );
                Some(task)
            }
            Err(e) => {
                warn!(error = %e, "task not durably recorded");
                None
            }
        };
        self.set_task_status(&task, TaskStatus::Running);

        let outcome = self.run_round_inner(state, user_text).await;
        match &outcome {
            Ok(_) => self.set_task_status(&task, TaskStatus::Completed),
            Err(e) => {
                error!(error = %e, round = state.round, chat_id = %state.chat_id, "round failed");
                let kind = if matches!(e, EngineError::Provider(_)) {
                    EventKind::ApiError
                } else {
                    EventKind::SystemError
                };
                self.record_event(
                    kind,
                    &state.chat_id,
                    json!({
                        "kind": e.error_kind(),
                        "message": e.to_string(),
                        "fatal": e.is_fatal(),
                        "round": state.round,
                    }),
                );
                self.set_task_status(&task, TaskStatus::Failed);
            }
        }
        outcome
    }

    async fn run_round_inner(
        &self,
        state: &RoundState,
        user_text: Option<String>,
    ) -> Result<RoundOutcome, EngineError> {
        let chat_id = &state.chat_id;

        // Fresh turns append the user message; follow-up rounds are synthetic
        // and their "user turn" is the tool results already in history.
        if let Some(text) = user_text {
            let chars = text.chars().count();
            self.record_message(chat_id, Message::user(text));
            self.record_event(EventKind::UserMessage, chat_id, json!({"chars": chars}));
        }

        let request = ProviderRequest {
            model: self.config.model.clone(),
            system: self.system_instruction(),
            messages: self.context_window(chat_id),
            tools: self.tools.definitions(),
        };

        // Sanitized: shape only, no message bodies, no credentials.
        self.record_event(
            EventKind::ApiRequest,
            chat_id,
            json!({
                "model": request.model,
                "messages": request.messages.len(),
                "tools": request.tools.len(),
                "stream": self.config.stream,
            }),
        );

        self.status.set(ThinkingStatus::WaitingForModel);
        let (content, tool_calls) = if self.config.stream {
            self.run_streaming(chat_id, &request).await?
        } else {
            self.run_blocking(&request).await?
        };

        self.record_event(
            EventKind::ApiResponse,
            chat_id,
            json!({
                "chars": content.chars().count(),
                "tool_calls": tool_calls.len(),
            }),
        );

        // From here both response modes converge: identical history, task,
        // and event writes regardless of how the response arrived.
        let assistant = if tool_calls.is_empty() {
            Message::assistant(content.clone())
        } else {
            let text = (!content.is_empty()).then(|| content.clone());
            Message::assistant_with_tool_calls(text, tool_calls.clone())
        };
        self.record_message(chat_id, assistant);
        self.record_event(
            EventKind::AssistantMessage,
            chat_id,
            json!({"chars": content.chars().count(), "tool_calls": tool_calls.len()}),
        );

        if tool_calls.is_empty() {
            return Ok(RoundOutcome::Answered(content));
        }

        // Single logical thread: requested tools run one at a time, in order.
        for call in &tool_calls {
            let result = self.invoke_tool(chat_id, call).await;
            self.record_message(chat_id, Message::tool(call.id.clone(), result.message_content()));
            self.record_event(
                EventKind::ToolMessage,
                chat_id,
                json!({"tool": result.tool_name, "success": result.success}),
            );
        }

        Ok(RoundOutcome::ToolsExecuted)
    }

    async fn run_blocking(
        &self,
        request: &ProviderRequest,
    ) -> Result<(String, Vec<ToolCallRequest>), EngineError> {
        let parsed = self.provider.complete(request).await?;
        Ok((parsed.content, parsed.tool_calls))
    }

    async fn run_streaming(
        &self,
        chat_id: &ChatId,
        request: &ProviderRequest,
    ) -> Result<(String, Vec<ToolCallRequest>), EngineError> {
        let mut stream = self.provider.stream(request).await?;
        self.record_event(EventKind::StreamStarted, chat_id, json!({}));

        let mut tool_calls = Vec::new();
        let mut completed: Option<String> = None;
        let mut thinking_active = false;
        let mut streaming = false;

        while let Some(chunk) = stream.next().await {
            match chunk {
                StreamChunk::Token { text } => {
                    if !streaming {
                        self.status.set(ThinkingStatus::Streaming);
                        streaming = true;
                    }
                    self.signal(AgentSignal::TokenDelta {
                        chat_id: chat_id.clone(),
                        delta: text,
                    });
                }
                StreamChunk::Thinking { status } => {
                    let kind = if thinking_active {
                        EventKind::ThinkingUpdated
                    } else {
                        thinking_active = true;
                        EventKind::ThinkingStarted
                    };
                    self.record_event(kind, chat_id, json!({"chars": status.chars().count()}));
                    self.status.set(ThinkingStatus::Thinking(status.clone()));
                    self.signal(AgentSignal::ThinkingUpdate {
                        chat_id: chat_id.clone(),
                        status,
                    });
                }
                StreamChunk::ToolCall { request } => {
                    tool_calls.push(request);
                }
                StreamChunk::Complete { content } => {
                    completed = Some(content);
                    break;
                }
                StreamChunk::Error { error } => {
                    self.record_event(
                        EventKind::StreamError,
                        chat_id,
                        json!({"kind": error.error_kind(), "message": error.to_string()}),
                    );
                    return Err(EngineError::Provider(error));
                }
            }
        }

        if thinking_active {
            self.record_event(EventKind::ThinkingEnded, chat_id, json!({}));
        }

        let content = completed
            .ok_or_else(|| EngineError::Internal("stream ended without a completion chunk".into()))?;
        self.record_event(
            EventKind::StreamCompleted,
            chat_id,
            json!({"chars": content.chars().count(), "tool_calls": tool_calls.len()}),
        );
        Ok((content, tool_calls))
    }

    async fn invoke_tool(&self, chat_id: &ChatId, call: &ToolCallRequest) -> ToolResult {
        self.status.set(ThinkingStatus::RunningTool(call.name.clone()));
        self.signal(AgentSignal::ToolStarted {
            chat_id: chat_id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
        });
        self.record_event(EventKind::ToolCallStarted, chat_id, tool_event_data(call, None, None));

        let start = Instant::now();
        let result = self.tools.execute(&call.name, &call.arguments).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let kind = if result.success {
            EventKind::ToolCallCompleted
        } else {
            EventKind::ToolCallFailed
        };
        self.record_event(kind, chat_id, tool_event_data(call, Some(&result), Some(duration_ms)));
        self.signal(AgentSignal::ToolFinished {
            chat_id: chat_id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: result.success,
            duration_ms,
        });
        result
    }

    /// Append a message to the in-session list and, when enabled, durable
    /// history. A lost durable write degrades durability, never the turn.
    fn record_message(&self, chat_id: &ChatId, message: Message) {
        self.session
            .lock()
            .entry(chat_id.clone())
            .or_default()
            .push(message.clone());

        if !self.config.history_enabled {
            return;
        }
        match self.history.append_message(chat_id, message) {
            Ok(created) => {
                if created {
                    self.record_event(EventKind::ChatCreated, chat_id, json!({}));
                }
            }
            Err(e) => warn!(error = %e, chat_id = %chat_id, "message not durably recorded"),
        }
    }

    /// The provider-bound context: durable history when enabled, otherwise
    /// the in-session list, either way capped to the configured window.
    fn context_window(&self, chat_id: &ChatId) -> Vec<Message> {
        let max = self.config.context_window_messages;
        if self.config.history_enabled {
            self.history.context_window(chat_id, Some(max))
        } else {
            let session = self.session.lock();
            let messages = session.get(chat_id).map(Vec::as_slice).unwrap_or_default();
            let start = messages.len().saturating_sub(max);
            messages[start..].to_vec()
        }
    }

    fn system_instruction(&self) -> String {
        let summary = self.tools.summary();
        if summary.is_empty() {
            self.config.system_instruction.clone()
        } else {
            format!(
                "{}\n\nAvailable tools:\n{}",
                self.config.system_instruction, summary
            )
        }
    }

    fn set_task_status(&self, task: &Option<Task>, status: TaskStatus) {
        let Some(task) = task else { return };
        match self.tasks.update(&task.id, TaskPatch::status(status)) {
            Ok(updated) => {
                if let Some(chat_id) = &updated.chat_id {
                    self.record_event(
                        EventKind::TaskStatusChanged,
                        chat_id,
                        json!({"task_id": updated.id, "status": updated.status}),
                    );
                }
            }
            Err(e) => warn!(error = %e, task_id = %task.id, "task status not durably recorded"),
        }
    }

    fn record_event(&self, kind: EventKind, chat_id: &ChatId, data: serde_json::Value) {
        if let Err(e) = self.events.append(kind, Some(chat_id.clone()), data) {
            warn!(error = %e, kind = %kind, "event not durably recorded");
        }
    }

    fn signal(&self, signal: AgentSignal) {
        // Observers are optional; a dropped receiver must not affect the turn.
        let _ = self.signals.send(signal);
    }

    fn error_result(&self, chat_id: ChatId, err: EngineError) -> TurnResult {
        TurnResult {
            chat_id,
            content: error_reply(&err),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Error,
            error: Some(ErrorInfo {
                kind: err.error_kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// One payload shape for tool initiation, completion, and failure events.
fn tool_event_data(
    call: &ToolCallRequest,
    result: Option<&ToolResult>,
    duration_ms: Option<u64>,
) -> serde_json::Value {
    json!({
        "tool_call_id": call.id,
        "tool": call.name,
        "success": result.map(|r| r.success),
        "error": result.and_then(|r| r.error.clone()),
        "duration_ms": duration_ms,
    })
}

/// Human-readable reply for a conversational failure, keyed on the
/// classified error.
fn error_reply(err: &EngineError) -> String {
    match err {
        EngineError::Validation(e) => format!("That message can't be sent: {e}."),
        EngineError::Config(e) => {
            format!("The assistant isn't configured yet: {e}. Update the connection settings and try again.")
        }
        EngineError::Provider(ProviderError::AuthRejected(_)) => {
            "The model provider rejected the configured credentials. Check the API key in the connection settings.".into()
        }
        EngineError::Provider(ProviderError::RateLimited { .. }) => {
            "The model provider is rate limiting requests right now. Give it a moment and try again.".into()
        }
        EngineError::Provider(ProviderError::ServerError { .. }) => {
            "The model provider reported a server problem. Try again shortly.".into()
        }
        _ => "Something went wrong while generating a response. Please try again.".into(),
    }
}
