//! Sequence compilation into ordered levels.
//!
//! Members become graph nodes and declared parents become edges
//! (parent -> child). A breadth-first Kahn pass peels off one level per
//! round: every member whose in-degree has dropped to zero. Members left
//! over when the frontier runs dry sit on a cycle or behind one.

use flowcore::{ConfigError, SequenceSpec};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Ordered levels of a sequence; members of one level are mutually independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDag {
    levels: Vec<Vec<String>>,
}

impl CompiledDag {
    pub fn compile(spec: &SequenceSpec) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for member in &spec.nodes {
            if index.contains_key(member.as_str()) {
                tracing::warn!(
                    "build:DAG : node {} listed twice in sequence {} - keeping first",
                    member,
                    spec.id
                );
                continue;
            }
            index.insert(member.as_str(), graph.add_node(member.as_str()));
        }

        let mut in_degree = vec![0usize; graph.node_count()];
        for child in graph.node_indices().collect::<Vec<_>>() {
            let child_id = graph[child];
            for parent in spec.parents_of(child_id) {
                match index.get(parent.as_str()) {
                    Some(&parent_idx) => {
                        graph.add_edge(parent_idx, child, ());
                        in_degree[child.index()] += 1;
                    }
                    None => tracing::warn!(
                        "build:DAG : parent node {} of node {} not found in sequence {} - skipping dependency",
                        parent,
                        child_id,
                        spec.id
                    ),
                }
            }
        }

        let mut frontier: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();
        let mut levels = Vec::new();
        let mut visited = 0;

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for &node in &frontier {
                for child in graph.neighbors_directed(node, Direction::Outgoing) {
                    in_degree[child.index()] -= 1;
                    if in_degree[child.index()] == 0 {
                        next.push(child);
                    }
                }
            }
            // node indices follow declaration order
            next.sort();
            visited += frontier.len();
            levels.push(frontier.iter().map(|&n| graph[n].to_string()).collect());
            frontier = next;
        }

        if visited < graph.node_count() {
            let unresolved: Vec<String> = graph
                .node_indices()
                .filter(|n| in_degree[n.index()] > 0)
                .map(|n| graph[n].to_string())
                .collect();
            let cycles: Vec<Vec<String>> = tarjan_scc(&graph)
                .into_iter()
                .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
                .map(|mut scc| {
                    scc.sort();
                    scc.into_iter().map(|n| graph[n].to_string()).collect()
                })
                .collect();
            tracing::error!(
                "build:DAG : sequence {} has cycles or unresolved dependencies: {:?}",
                spec.id,
                unresolved
            );
            return Err(ConfigError::CyclicDependency {
                sequence: spec.id.clone(),
                unresolved,
                cycles,
            });
        }

        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().flatten().map(String::as_str)
    }

    pub fn level_of(&self, member: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|m| m == member))
    }

    /// First level with a member not yet `done`; `len()` when all are done.
    pub fn resume_index(&self, done: impl Fn(&str) -> bool) -> usize {
        self.levels
            .iter()
            .position(|level| !level.is_empty() && !level.iter().all(|m| done(m)))
            .unwrap_or(self.levels.len())
    }
}
