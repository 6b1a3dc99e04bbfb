use async_trait::async_trait;
use chrono::Utc;

use wisp_core::tools::{Tool, ToolError};

/// Reports the current UTC time.
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Returns the current UTC date and time"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({ "utc": Utc::now().to_rfc3339() }))
    }
}
