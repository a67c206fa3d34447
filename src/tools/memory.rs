use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolEffect, ToolResult, required_str};

/// `set_memory {key, value}`: remember a fact about the user.
///
/// The console merges the value into its memory view and persists it. The
/// model always gets `{ok: true}`, persistence failures are only logged.
pub struct SetMemoryTool {
    context: ToolContext,
}

impl SetMemoryTool {
    pub fn new(context: ToolContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for SetMemoryTool {
    fn name(&self) -> &str {
        "set_memory"
    }

    fn description(&self) -> &str {
        "Saves important data about the user into memory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "The key of the memory value. Always use lowercase and underscores, no other characters."
                },
                "value": {
                    "type": "string",
                    "description": "Value can be anything represented as a string"
                }
            },
            "required": ["key", "value"]
        })
    }

    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        let key = required_str(&params, "key")?.to_string();
        let value = params.get("value").cloned().unwrap_or(Value::Null);

        tracing::debug!(key = %key, "Setting memory");
        self.context.emit(ToolEffect::SetMemory { key, value });
        Ok(json!({ "ok": true }))
    }
}
