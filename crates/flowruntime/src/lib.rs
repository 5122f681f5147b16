//! Workflow execution runtime
//!
//! This crate provides the orchestration core: per-node queues with retry,
//! the sequence compiler, the level-by-level executor, and the runtime that
//! ties every node and sequence behind one `run` entry point.

mod dag;
mod executor;
mod loader;
mod node;
mod queue;
mod registry;
mod runtime;

pub use dag::CompiledDag;
pub use executor::SequenceExecutor;
pub use loader::{load_units, parse_units};
pub use node::{NodeRuntime, RetryPolicy};
pub use queue::{Admission, NodeQueue};
pub use registry::{Entry, EntryKind, Executable, FunctionMetadata, FunctionRegistry};
pub use runtime::{FlowRuntime, RuntimeConfig};
