use std::collections::HashMap;
use std::sync::Arc;

use wisp_core::tools::{Tool, ToolArguments, ToolDefinition, ToolResult};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the provider request, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Human-readable one-line-per-tool summary, spliced into the system
    /// instruction.
    pub fn summary(&self) -> String {
        self.definitions()
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one requested tool call. Never fails: argument parse errors,
    /// unknown tools, and execution errors all come back as a `ToolResult`
    /// failure for the model to read.
    pub async fn execute(&self, name: &str, arguments: &ToolArguments) -> ToolResult {
        let args = match arguments.parse() {
            Ok(args) => args,
            Err(e) => return ToolResult::failure(name, e.to_string()),
        };

        let tool = match self.get(name) {
            Some(tool) => tool,
            None => {
                return ToolResult::failure(
                    name,
                    format!(
                        "unknown tool '{name}'; available tools: {}",
                        self.names().join(", ")
                    ),
                )
            }
        };

        match tool.execute(args).await {
            Ok(output) => ToolResult::ok(name, output),
            Err(e) => ToolResult::failure(name, e.to_string()),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
