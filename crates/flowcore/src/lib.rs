//! Core abstractions for the flow engine
//!
//! This crate provides the vocabulary the runtime is built from: unit
//! declarations, the data bag, run contexts, the work-function trait, the
//! streams collaborator, the event bus and the error taxonomy. It holds no
//! scheduling logic.

mod context;
mod error;
pub mod events;
mod node;
pub mod streams;
pub mod value;
mod workflow;

pub use context::{Dispatch, RunContext, SequenceState};
pub use error::{ConfigError, FlowError, NodeError};
pub use events::*;
pub use node::{node_fn, FnNode, Node, NodeContext};
pub use streams::{BroadcastStreams, NoopStreams, StreamEvent, Streams};
pub use value::{DataBag, Map, Value};
pub use workflow::{NodeId, NodeSpec, QueueConfig, Relations, SequenceId, SequenceSpec, UnitSet};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
