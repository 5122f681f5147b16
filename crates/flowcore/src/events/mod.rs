mod base;

pub use base::{EventBus, ExecutionId, LifecycleEvent, SNIPPET_LEN};
