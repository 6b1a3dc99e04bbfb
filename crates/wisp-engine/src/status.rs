use tokio::sync::watch;

/// What the agent is doing right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThinkingStatus {
    Idle,
    Preparing,
    WaitingForModel,
    Streaming,
    /// A model thinking update, verbatim.
    Thinking(String),
    RunningTool(String),
}

impl std::fmt::Display for ThinkingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Preparing => f.write_str("preparing"),
            Self::WaitingForModel => f.write_str("waiting for model"),
            Self::Streaming => f.write_str("streaming"),
            Self::Thinking(status) => write!(f, "thinking: {status}"),
            Self::RunningTool(name) => write!(f, "running tool: {name}"),
        }
    }
}

/// Single-slot status publisher: the orchestrator writes, observers watch.
/// Only the latest value matters, so the slot is a watch channel.
pub struct ThinkingStatusTracker {
    tx: watch::Sender<ThinkingStatus>,
}

impl ThinkingStatusTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ThinkingStatus::Idle);
        Self { tx }
    }

    pub fn set(&self, status: ThinkingStatus) {
        self.tx.send_replace(status);
    }

    pub fn current(&self) -> ThinkingStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThinkingStatus> {
        self.tx.subscribe()
    }
}

impl Default for ThinkingStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
