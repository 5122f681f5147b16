//! Standard work-function library
//!
//! Small built-in functions that unit files can point `function` at.

mod data;
mod debug;
mod http;
mod time;
mod transform;

pub use data::ConstantNode;
pub use debug::DebugNode;
pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};

use flowruntime::{FunctionMetadata, FunctionRegistry};
use std::sync::Arc;

fn meta(description: &str, category: &str) -> FunctionMetadata {
    FunctionMetadata {
        description: description.to_string(),
        category: category.to_string(),
    }
}

/// Register all standard work functions with a registry
pub fn register_all(registry: &mut FunctionRegistry) {
    registry
        .register_with_metadata(
            "debug.log",
            Arc::new(DebugNode),
            meta("Logs input values for debugging", "debug"),
        )
        .register_with_metadata(
            "data.constant",
            Arc::new(ConstantNode),
            meta("Returns the node's static config as its result", "data"),
        )
        .register_with_metadata(
            "time.delay",
            Arc::new(DelayNode),
            meta("Waits delay_ms milliseconds, then passes its input through", "time"),
        )
        .register_with_metadata(
            "transform.json_parse",
            Arc::new(JsonParseNode),
            meta("Parse the `json` input string", "transform"),
        )
        .register_with_metadata(
            "transform.json_stringify",
            Arc::new(JsonStringifyNode),
            meta("Convert the `value` input to a JSON string", "transform"),
        )
        .register_with_metadata(
            "http.request",
            Arc::new(HttpRequestNode::new()),
            meta("Make HTTP requests", "http"),
        );
}
