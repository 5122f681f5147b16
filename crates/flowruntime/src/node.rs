use crate::queue::NodeQueue;
use crate::runtime::RuntimeConfig;
use chrono::Utc;
use flowcore::value::{is_falsy, project, snippet};
use flowcore::{
    DataBag, EventBus, FlowError, LifecycleEvent, Node, NodeContext, NodeError, NodeSpec,
    RunContext, Value, SNIPPET_LEN,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};

/// Retry policy for node execution
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub limit: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn resolve(spec: &NodeSpec, defaults: &RuntimeConfig) -> Self {
        let queue = spec.queue.as_ref();
        Self {
            limit: queue
                .and_then(|q| q.retry_limit)
                .unwrap_or(defaults.default_retry_limit),
            delay_ms: queue
                .and_then(|q| q.retry_delay_ms)
                .unwrap_or(defaults.default_retry_delay_ms),
            backoff_multiplier: queue
                .and_then(|q| q.retry_backoff)
                .unwrap_or(defaults.default_retry_backoff)
                .max(1.0),
        }
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        Duration::from_millis((self.delay_ms as f64 * factor).min(u64::MAX as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// One work function wrapped with projection, its private queue and retry.
pub struct NodeRuntime {
    spec: NodeSpec,
    function: Arc<dyn Node>,
    queue: NodeQueue,
    retry: RetryPolicy,
    events: Arc<EventBus>,
}

impl NodeRuntime {
    pub fn new(
        spec: NodeSpec,
        function: Arc<dyn Node>,
        config: &RuntimeConfig,
        events: Arc<EventBus>,
    ) -> Self {
        let queue = NodeQueue::new(spec.id.clone(), spec.queue.as_ref());
        let retry = RetryPolicy::resolve(&spec, config);
        Self {
            spec,
            function,
            queue,
            retry,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn queue(&self) -> &NodeQueue {
        &self.queue
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn run(&self, context: RunContext, data: DataBag) -> Result<Value, FlowError> {
        let id = self.id();
        self.events.emit(LifecycleEvent::NodeEnqueued {
            id: id.to_string(),
            context: context.detached(),
            data: data.clone(),
            timestamp: Utc::now(),
        });

        let _admission = self.queue.admit().await;

        self.events.emit(LifecycleEvent::NodeStarted {
            id: id.to_string(),
            context: context.detached(),
            data: data.clone(),
            timestamp: Utc::now(),
        });
        let started = Instant::now();

        // an empty `in` list passes the whole bag, like an absent one
        let input = match &self.spec.inputs {
            Some(keys) if !keys.is_empty() => data.project(keys),
            _ => data.clone(),
        };

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let ctx = NodeContext::new(id, context.clone(), input.clone())
                .with_config(self.spec.config_bag());

            match self.queue.timed(self.function.execute(ctx)).await {
                Ok(result) => break self.shape(result),
                Err(e) if attempt <= self.retry.limit => {
                    tracing::warn!("node {} attempt {} failed: {} - retrying", id, attempt, e);
                    self.events.emit(LifecycleEvent::NodeRetrying {
                        id: id.to_string(),
                        run_id: context.run_id,
                        attempt,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    let wait = self.retry.delay_for(attempt);
                    if !wait.is_zero() {
                        sleep(wait).await;
                    }
                }
                Err(e) => return Err(self.fail(&context, &input, attempt, e)),
            }
        };

        self.events.emit(LifecycleEvent::NodeCompleted {
            id: id.to_string(),
            context: context.detached(),
            data,
            response: response.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        Ok(response)
    }

    /// Normalize falsy results, then apply output projection.
    fn shape(&self, result: Value) -> Value {
        if is_falsy(&result) {
            return json!({ "success": false });
        }
        match &self.spec.outputs {
            Some(keys) if !keys.is_empty() => project(&result, keys).into_value(),
            _ => result,
        }
    }

    fn fail(&self, context: &RunContext, input: &DataBag, attempts: u32, error: NodeError) -> FlowError {
        tracing::error!(
            "node {} failed after {} attempt(s): {}\tinput: {}",
            self.id(),
            attempts,
            error,
            snippet(input, SNIPPET_LEN)
        );
        self.events.emit(LifecycleEvent::NodeFailed {
            id: self.id().to_string(),
            run_id: context.run_id,
            attempts,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        FlowError::Node {
            id: self.id().to_string(),
            attempts,
            source: error,
        }
    }
}
