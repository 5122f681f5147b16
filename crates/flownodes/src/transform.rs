use async_trait::async_trait;
use flowcore::{Node, NodeContext, NodeError, Value};
use serde_json::json;

/// Parse the `json` input string into `parsed`
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let input = ctx
            .require_input("json")?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "json".to_string(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })?;

        let parsed: Value = serde_json::from_str(input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(json!({ "parsed": parsed }))
    }
}

/// Stringify the `value` input into `json`
pub struct JsonStringifyNode;

#[async_trait]
impl Node for JsonStringifyNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let value = ctx.require_input("value")?;

        let json_str = serde_json::to_string_pretty(value)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(json!({ "json": json_str }))
    }
}
