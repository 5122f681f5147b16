use crate::value::{DataBag, Map};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ids share one flat namespace across nodes and sequences.
pub type NodeId = String;
pub type SequenceId = String;

/// Declaration of one node: which work function it wraps and how.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(default)]
    pub id: NodeId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// Registered work function to wrap; defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    /// Fields projected from the incoming bag. `None` passes the whole bag.
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,

    /// Fields projected from the function's result. `None` passes it raw.
    #[serde(default, rename = "out", skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueConfig>,

    /// Static configuration handed to the work function.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Id of the work function backing this node.
    pub fn function_id(&self) -> &str {
        self.function.as_deref().unwrap_or(&self.id)
    }

    pub fn config_bag(&self) -> DataBag {
        DataBag::from(self.config.clone())
    }
}

/// Per-node admission and retry limits. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Max simultaneous in-flight executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Max admissions per `interval_time_ms` window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_limit: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_time_ms: Option<u64>,

    /// Max wall time of a single attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Additional attempts after the first failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<f64>,
}

impl QueueConfig {
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    pub fn interval(mut self, limit: usize, time_ms: u64) -> Self {
        self.interval_limit = Some(limit);
        self.interval_time_ms = Some(time_ms);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn retry(mut self, limit: u32, delay_ms: u64) -> Self {
        self.retry_limit = Some(limit);
        self.retry_delay_ms = Some(delay_ms);
        self
    }
}

/// Dependency graph declaration over nodes and/or other sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceSpec {
    #[serde(default)]
    pub id: SequenceId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// Member ids, in declaration order.
    #[serde(default)]
    pub nodes: Vec<NodeId>,

    #[serde(default)]
    pub relations: Relations,

    /// Named application events that start this sequence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relations {
    /// member id -> ids that must complete first
    #[serde(default)]
    pub parents: BTreeMap<NodeId, Vec<NodeId>>,
}

impl SequenceSpec {
    pub fn new(id: impl Into<SequenceId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.nodes.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn with_parents<I, S>(mut self, node: impl Into<NodeId>, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.relations
            .parents
            .insert(node.into(), parents.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_trigger(mut self, event: impl Into<String>) -> Self {
        self.triggers.push(event.into());
        self
    }

    /// Declared parents of `node`, empty if undeclared.
    pub fn parents_of(&self, node: &str) -> &[NodeId] {
        self.relations
            .parents
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Already-materialized declarations, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitSet {
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, NodeSpec>,

    #[serde(default)]
    pub sequences: BTreeMap<SequenceId, SequenceSpec>,
}

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeSpec) -> &mut Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn add_sequence(&mut self, sequence: SequenceSpec) -> &mut Self {
        self.sequences.insert(sequence.id.clone(), sequence);
        self
    }

    /// Fill empty `id` fields from their map keys.
    pub fn normalize_ids(&mut self) {
        for (key, node) in self.nodes.iter_mut() {
            if node.id.is_empty() {
                node.id = key.clone();
            }
        }
        for (key, sequence) in self.sequences.iter_mut() {
            if sequence.id.is_empty() {
                sequence.id = key.clone();
            }
        }
    }
}
