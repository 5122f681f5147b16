use async_trait::async_trait;
use flowcore::{Node, NodeContext, NodeError, Value};

/// Returns the declaration's `config` mapping unchanged, seeding the data bag.
pub struct ConstantNode;

#[async_trait]
impl Node for ConstantNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        if ctx.config.is_empty() {
            return Err(NodeError::Configuration(format!(
                "{} has no config to return",
                ctx.id
            )));
        }
        Ok(ctx.config.into_value())
    }
}
