pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod status;
pub mod tools;
pub mod validate;

pub use config::{AgentConfig, ConfigError};
pub use error::EngineError;
pub use orchestrator::{ConversationOrchestrator, TurnOptions, TurnResult};
pub use registry::ToolRegistry;
pub use status::{ThinkingStatus, ThinkingStatusTracker};
