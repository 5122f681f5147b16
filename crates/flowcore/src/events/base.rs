use crate::value::{snippet, DataBag, Value};
use crate::{Dispatch, RunContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Width of payload snippets in log lines.
pub const SNIPPET_LEN: usize = 150;

/// Lifecycle events. Observability only; nothing in the engine reads them back.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    NodeEnqueued {
        id: String,
        context: RunContext,
        data: DataBag,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        id: String,
        context: RunContext,
        data: DataBag,
        timestamp: DateTime<Utc>,
    },
    NodeRetrying {
        id: String,
        run_id: Option<ExecutionId>,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        id: String,
        context: RunContext,
        data: DataBag,
        response: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        id: String,
        run_id: Option<ExecutionId>,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    SequenceStarted {
        id: String,
        context: RunContext,
        data: DataBag,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        id: String,
        index: usize,
        over: usize,
        context: RunContext,
        data: DataBag,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        id: String,
        index: usize,
        over: usize,
        context: RunContext,
        data: DataBag,
        timestamp: DateTime<Utc>,
    },
    SequenceCompleted {
        id: String,
        context: RunContext,
        data: DataBag,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Id of the node or sequence the event is about.
    pub fn id(&self) -> &str {
        match self {
            LifecycleEvent::NodeEnqueued { id, .. }
            | LifecycleEvent::NodeStarted { id, .. }
            | LifecycleEvent::NodeRetrying { id, .. }
            | LifecycleEvent::NodeCompleted { id, .. }
            | LifecycleEvent::NodeFailed { id, .. }
            | LifecycleEvent::SequenceStarted { id, .. }
            | LifecycleEvent::StepStarted { id, .. }
            | LifecycleEvent::StepCompleted { id, .. }
            | LifecycleEvent::SequenceCompleted { id, .. } => id,
        }
    }

    /// Short name used in log lines, e.g. `node:start` or `sequence:step:end`.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::NodeEnqueued { .. } => "node:enqueue",
            LifecycleEvent::NodeStarted { .. } => "node:start",
            LifecycleEvent::NodeRetrying { .. } => "node:retry",
            LifecycleEvent::NodeCompleted { .. } => "node:end",
            LifecycleEvent::NodeFailed { .. } => "node:failed",
            LifecycleEvent::SequenceStarted { .. } => "sequence:start",
            LifecycleEvent::StepStarted { .. } => "sequence:step:start",
            LifecycleEvent::StepCompleted { .. } => "sequence:step:end",
            LifecycleEvent::SequenceCompleted { .. } => "sequence:end",
        }
    }
}

/// Process-wide bus owned by the runtime.
///
/// Three concerns share it: the lifecycle broadcast, the table of named
/// triggers, and the fire-and-forget `run` channel. Firing never waits for
/// handlers; their failures are logged and go no further.
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
    triggers: BTreeMap<String, Vec<String>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            triggers: BTreeMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    /// Route the named application event `event` to `target` (a node or sequence id).
    pub fn subscribe_trigger(&mut self, event: impl Into<String>, target: impl Into<String>) {
        self.triggers.entry(event.into()).or_default().push(target.into());
    }

    pub fn trigger_targets(&self, event: &str) -> &[String] {
        self.triggers.get(event).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn triggers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.triggers
    }

    /// Fire the `run` channel: invoke `id` in the background.
    pub fn fire_run(
        &self,
        dispatcher: Arc<dyn Dispatch>,
        id: impl Into<String>,
        context: RunContext,
        data: DataBag,
    ) -> JoinHandle<()> {
        let id = id.into();
        tracing::debug!("event:run -> id:{}", id);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.run(&id, context, data).await {
                tracing::error!("event:run for '{}' failed: {}", id, e);
            }
        })
    }

    /// Fire a named application event at every subscribed target.
    pub fn fire(
        &self,
        dispatcher: Arc<dyn Dispatch>,
        event: &str,
        context: RunContext,
        data: DataBag,
    ) -> Vec<JoinHandle<()>> {
        let targets = self.trigger_targets(event);
        if targets.is_empty() {
            tracing::debug!("event:{} has no subscribers", event);
        }
        targets
            .iter()
            .map(|target| {
                tracing::debug!("event:{} -> {}", event, target);
                self.fire_run(dispatcher.clone(), target.clone(), context.clone(), data.clone())
            })
            .collect()
    }

    /// Log every lifecycle event through `tracing` until the bus closes.
    pub fn spawn_logger(&self) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("lifecycle logger skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn log_event(event: &LifecycleEvent) {
    let kind = event.kind();
    match event {
        LifecycleEvent::NodeEnqueued { id, data, .. } | LifecycleEvent::NodeStarted { id, data, .. } => {
            tracing::debug!("log:{} {}\t{}", kind, id, snippet(data, SNIPPET_LEN));
        }
        LifecycleEvent::NodeCompleted {
            id,
            response,
            duration_ms,
            ..
        } => {
            tracing::info!("log:{} {} ({}ms)\t{}", kind, id, duration_ms, snippet(response, SNIPPET_LEN));
        }
        LifecycleEvent::NodeRetrying { id, attempt, error, .. } => {
            tracing::warn!("log:{} {} attempt {}: {}", kind, id, attempt, error);
        }
        LifecycleEvent::NodeFailed { id, attempts, error, .. } => {
            tracing::error!("log:{} {} after {} attempt(s): {}", kind, id, attempts, error);
        }
        LifecycleEvent::StepStarted { id, index, over, .. }
        | LifecycleEvent::StepCompleted { id, index, over, .. } => {
            tracing::info!("log:{} {} [{}/{}]", kind, id, index + 1, over);
        }
        LifecycleEvent::SequenceStarted { id, data, .. } => {
            tracing::info!("log:{} {}\t{}", kind, id, snippet(data, SNIPPET_LEN));
        }
        LifecycleEvent::SequenceCompleted { id, duration_ms, .. } => {
            tracing::info!("log:{} {} ({}ms)", kind, id, duration_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn init_tracing() {
        use tracing_subscriber::{fmt, EnvFilter};
        let _ = fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init();
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatch for Recorder {
        async fn run(&self, id: &str, _context: RunContext, _data: DataBag) -> Result<Value, FlowError> {
            self.calls.lock().unwrap().push(id.to_string());
            if id == "broken" {
                return Err(FlowError::NotFound(id.to_string()));
            }
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn fire_reaches_every_subscriber() {
        let mut bus = EventBus::new(16);
        bus.subscribe_trigger("project:init", "seq:a");
        bus.subscribe_trigger("project:init", "seq:b");
        let recorder = Arc::new(Recorder::default());

        let handles = bus.fire(recorder.clone(), "project:init", RunContext::new(), DataBag::new());
        assert_eq!(handles.len(), 2);
        for h in handles {
            h.await.unwrap();
        }
        let mut calls = recorder.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["seq:a", "seq:b"]);
    }

    #[tokio::test]
    async fn handler_failures_stay_with_the_handler() {
        let bus = EventBus::new(16);
        let recorder = Arc::new(Recorder::default());
        let handle = bus.fire_run(recorder.clone(), "broken", RunContext::new(), DataBag::new());
        assert!(handle.await.is_ok());
        assert!(bus.fire(recorder, "nobody-listens", RunContext::new(), DataBag::new()).is_empty());
    }

    #[tokio::test]
    async fn emit_without_listeners_is_harmless() {
        let bus = EventBus::new(4);
        bus.emit(LifecycleEvent::NodeFailed {
            id: "n".into(),
            run_id: None,
            attempts: 1,
            error: "boom".into(),
            timestamp: Utc::now(),
        });
        let mut rx = bus.subscribe();
        bus.emit(LifecycleEvent::NodeRetrying {
            id: "n".into(),
            run_id: None,
            attempt: 1,
            error: "boom".into(),
            timestamp: Utc::now(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.id(), "n");
        assert_eq!(event.kind(), "node:retry");
    }

    #[tokio::test]
    async fn logger_drains_until_bus_closes() {
        init_tracing();
        let bus = EventBus::new(8);
        let logger = bus.spawn_logger();
        bus.emit(LifecycleEvent::NodeRetrying {
            id: "n".into(),
            run_id: None,
            attempt: 1,
            error: "boom".into(),
            timestamp: Utc::now(),
        });
        drop(bus);
        logger.await.unwrap();
    }
}
