use crate::executor::SequenceExecutor;
use crate::node::NodeRuntime;
use async_trait::async_trait;
use flowcore::{DataBag, FlowError, Node, RunContext, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Anything addressable through `run(id, context, data)`.
#[async_trait]
pub trait Executable: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, context: RunContext, data: DataBag) -> Result<Value, FlowError>;
}

#[async_trait]
impl Executable for NodeRuntime {
    fn id(&self) -> &str {
        NodeRuntime::id(self)
    }

    async fn run(&self, context: RunContext, data: DataBag) -> Result<Value, FlowError> {
        NodeRuntime::run(self, context, data).await
    }
}

#[async_trait]
impl Executable for SequenceExecutor {
    fn id(&self) -> &str {
        SequenceExecutor::id(self)
    }

    async fn run(&self, context: RunContext, data: DataBag) -> Result<Value, FlowError> {
        SequenceExecutor::run(self, context, data).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Node,
    Sequence,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Node => write!(f, "node"),
            EntryKind::Sequence => write!(f, "sequence"),
        }
    }
}

/// One slot of the unified id namespace.
#[derive(Clone)]
pub enum Entry {
    Node(Arc<NodeRuntime>),
    Sequence(Arc<SequenceExecutor>),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Node(_) => EntryKind::Node,
            Entry::Sequence(_) => EntryKind::Sequence,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceExecutor> {
        match self {
            Entry::Sequence(seq) => Some(seq),
            Entry::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeRuntime> {
        match self {
            Entry::Node(node) => Some(node),
            Entry::Sequence(_) => None,
        }
    }
}

#[async_trait]
impl Executable for Entry {
    fn id(&self) -> &str {
        match self {
            Entry::Node(node) => node.id(),
            Entry::Sequence(seq) => seq.id(),
        }
    }

    async fn run(&self, context: RunContext, data: DataBag) -> Result<Value, FlowError> {
        match self {
            Entry::Node(node) => node.run(context, data).await,
            Entry::Sequence(seq) => seq.run(context, data).await,
        }
    }
}

/// Metadata about a registered work function
#[derive(Debug, Clone)]
pub struct FunctionMetadata {
    pub description: String,
    pub category: String,
}

impl Default for FunctionMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available work functions, keyed by function id
pub struct FunctionRegistry {
    functions: BTreeMap<String, (Arc<dyn Node>, FunctionMetadata)>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Register a work function
    pub fn register(&mut self, id: impl Into<String>, function: Arc<dyn Node>) -> &mut Self {
        self.register_with_metadata(id, function, FunctionMetadata::default())
    }

    pub fn register_with_metadata(
        &mut self,
        id: impl Into<String>,
        function: Arc<dyn Node>,
        metadata: FunctionMetadata,
    ) -> &mut Self {
        let id = id.into();
        tracing::debug!("Registering work function: {}", id);
        if self.functions.insert(id.clone(), (function, metadata)).is_some() {
            tracing::warn!("Work function {} registered twice - keeping the latest", id);
        }
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Node>> {
        self.functions.get(id).map(|(f, _)| f.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.contains_key(id)
    }

    /// Get all registered function ids
    pub fn list(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn metadata(&self, id: &str) -> Option<&FunctionMetadata> {
        self.functions.get(id).map(|(_, m)| m)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
