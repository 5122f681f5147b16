use async_trait::async_trait;
use flowcore::{Node, NodeContext, NodeError, Value};
use tokio::time::{sleep, Duration};

/// Delay execution for `delay_ms` (config or input, default 1000)
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let delay_ms = ctx
            .setting_or("delay_ms", Value::from(1000))
            .as_f64()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "delay_ms".to_string(),
                expected: "number".to_string(),
                actual: "other".to_string(),
            })?
            .max(0.0) as u64;

        tracing::debug!("{} delaying for {}ms", ctx.id, delay_ms);
        sleep(Duration::from_millis(delay_ms)).await;

        Ok(ctx.data.into_value())
    }
}
