use async_trait::async_trait;
use flowcore::value::snippet;
use flowcore::{Node, NodeContext, NodeError, Value};
use serde_json::json;

/// Logs its input bag and echoes the `message` input back.
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let message = ctx
            .setting_or("message", Value::String("(no message)".to_string()))
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| "(no message)".to_string());

        tracing::info!("DEBUG [{}]: {}", ctx.id, message);
        for (key, value) in ctx.data.as_map() {
            tracing::info!("  {}: {}", key, snippet(value, 200));
        }

        Ok(json!({ "message": message }))
    }
}
