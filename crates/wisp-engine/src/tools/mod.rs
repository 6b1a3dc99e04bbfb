pub mod calculator;
pub mod clock;
pub mod echo;

pub use calculator::CalculatorTool;
pub use clock::ClockTool;
pub use echo::EchoTool;

use std::sync::Arc;

use crate::registry::ToolRegistry;

/// Registry pre-loaded with the built-in tools.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool));
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(ClockTool));
    registry
}
