use crate::value::{DataBag, Value};
use crate::{NodeError, RunContext};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A work function: the pluggable payload a node wraps.
///
/// Failure is reported by returning `Err`; a falsy `Ok` value means
/// "completed without output".
#[async_trait]
pub trait Node: Send + Sync {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;
}

/// What a work function is invoked with.
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// Id of the node being executed.
    pub id: String,

    /// Ambient values, with the global `run` handle attached.
    pub context: RunContext,

    /// Projected input.
    pub data: DataBag,

    /// Static configuration from the node declaration.
    pub config: DataBag,
}

impl NodeContext {
    pub fn new(id: impl Into<String>, context: RunContext, data: DataBag) -> Self {
        Self {
            id: id.into(),
            context,
            data,
            config: DataBag::new(),
        }
    }

    pub fn with_config(mut self, config: DataBag) -> Self {
        self.config = config;
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        match self.data.get(name) {
            Some(Value::Null) | None => Err(NodeError::MissingInput(name.to_string())),
            Some(value) => Ok(value),
        }
    }

    /// Config value, falling back to the input bag, then to `default`.
    pub fn setting_or(&self, name: &str, default: Value) -> Value {
        self.config
            .get(name)
            .or_else(|| self.data.get(name))
            .cloned()
            .unwrap_or(default)
    }
}

/// Adapter turning an async closure into a [`Node`].
pub struct FnNode<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Node for FnNode<F, Fut>
where
    F: Fn(NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, NodeError>> + Send,
{
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        (self.func)(ctx).await
    }
}

/// Wrap an async closure as a shareable work function.
pub fn node_fn<F, Fut>(func: F) -> Arc<dyn Node>
where
    F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
{
    Arc::new(FnNode {
        func,
        _marker: PhantomData,
    })
}
