use crate::dag::CompiledDag;
use crate::executor::SequenceExecutor;
use crate::node::NodeRuntime;
use crate::registry::{Entry, EntryKind, Executable, FunctionRegistry};
use async_trait::async_trait;
use flowcore::{
    ConfigError, DataBag, Dispatch, EventBus, FlowError, LifecycleEvent, RunContext, UnitSet,
    Value,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Spawn a task writing every lifecycle event through `tracing`.
    pub log_events: bool,
    pub default_retry_limit: u32,
    pub default_retry_delay_ms: u64,
    pub default_retry_backoff: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            log_events: false,
            default_retry_limit: 5,
            default_retry_delay_ms: 1000,
            default_retry_backoff: 2.0,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `FLOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
                    None
                }
            }
        }

        if let Some(v) = parsed("FLOW_EVENT_BUFFER", lookup("FLOW_EVENT_BUFFER")) {
            self.event_buffer_size = v;
        }
        if let Some(v) = parsed("FLOW_LOG_EVENTS", lookup("FLOW_LOG_EVENTS")) {
            self.log_events = v;
        }
        if let Some(v) = parsed("FLOW_RETRY_LIMIT", lookup("FLOW_RETRY_LIMIT")) {
            self.default_retry_limit = v;
        }
        if let Some(v) = parsed("FLOW_RETRY_DELAY_MS", lookup("FLOW_RETRY_DELAY_MS")) {
            self.default_retry_delay_ms = v;
        }
        self
    }
}

/// The assembled system: every node and sequence behind one `run` entry point.
///
/// Cheap to clone; clones share the same registry and event bus.
#[derive(Clone)]
pub struct FlowRuntime {
    inner: Arc<Inner>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    events: Arc<EventBus>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Build the registry: wrap functions as nodes, then fold in compiled sequences.
    pub fn build(
        units: UnitSet,
        functions: &FunctionRegistry,
        config: RuntimeConfig,
    ) -> Result<Self, FlowError> {
        let mut units = units;
        units.normalize_ids();

        for id in units.nodes.keys() {
            if units.sequences.contains_key(id) {
                return Err(ConfigError::DuplicateId(id.clone()).into());
            }
        }

        let mut bus = EventBus::new(config.event_buffer_size);
        for (id, sequence) in &units.sequences {
            for trigger in &sequence.triggers {
                tracing::info!("Sequence {} listens to event {}", id, trigger);
                bus.subscribe_trigger(trigger.clone(), id.clone());
            }
        }
        let events = Arc::new(bus);

        let mut entries = HashMap::new();
        for (id, mut spec) in units.nodes {
            spec.id = id.clone();
            match functions.get(spec.function_id()) {
                Some(function) => {
                    tracing::debug!("Wrapping node {} ({})", id, spec.function_id());
                    let node = NodeRuntime::new(spec, function, &config, events.clone());
                    entries.insert(id, Entry::Node(Arc::new(node)));
                }
                None => tracing::warn!(
                    "Node {} declares function {} which is not registered - skipping",
                    id,
                    spec.function_id()
                ),
            }
        }

        for id in functions.list() {
            let used = entries
                .values()
                .filter_map(Entry::as_node)
                .any(|node| node.spec().function_id() == id);
            if !used {
                tracing::debug!("Work function {} has no node declaration - skipping", id);
            }
        }

        for (id, mut spec) in units.sequences {
            spec.id = id.clone();
            let sequence = SequenceExecutor::new(spec, events.clone())?;
            entries.insert(id, Entry::Sequence(Arc::new(sequence)));
        }

        for entry in entries.values() {
            if let Some(sequence) = entry.as_sequence() {
                for member in sequence.dag().members() {
                    if !entries.contains_key(member) {
                        tracing::warn!(
                            "Sequence {} references {} which is neither a node nor a sequence",
                            sequence.id(),
                            member
                        );
                    }
                }
            }
        }

        tracing::info!(
            "Flow runtime built: {} node(s), {} sequence(s)",
            entries.values().filter(|e| e.kind() == EntryKind::Node).count(),
            entries.values().filter(|e| e.kind() == EntryKind::Sequence).count()
        );

        if config.log_events {
            if tokio::runtime::Handle::try_current().is_ok() {
                events.spawn_logger();
            } else {
                tracing::warn!("log_events is set but no tokio runtime is running - lifecycle logger not started");
            }
        }

        Ok(Self {
            inner: Arc::new(Inner {
                entries,
                events,
                config,
            }),
        })
    }

    /// Run a node or sequence by id and wait for its result.
    pub async fn run(&self, id: &str, context: RunContext, data: DataBag) -> Result<Value, FlowError> {
        let entry = self.inner.entries.get(id).ok_or_else(|| {
            tracing::error!("system run: unknown id {}", id);
            FlowError::NotFound(id.to_string())
        })?;
        let context = self.attach(context);
        entry.run(context, data).await.map_err(|e| {
            tracing::error!("system run {} failed: {}", id, e);
            e
        })
    }

    /// Fire the `run` channel: start `id` in the background.
    pub fn dispatch(&self, id: impl Into<String>, context: RunContext, data: DataBag) -> JoinHandle<()> {
        self.inner
            .events
            .fire_run(self.handle(), id, context, data)
    }

    /// Fire a named application event; every sequence listening to it starts in the background.
    pub fn emit(&self, event: &str, context: RunContext, data: DataBag) -> Vec<JoinHandle<()>> {
        self.inner.events.fire(self.handle(), event, context, data)
    }

    /// Fire `event` and wait for every triggered run to finish.
    ///
    /// Returns the number of runs started. Failures inside the runs stay
    /// with them (they are logged); only a panicked run task is an error.
    pub async fn emit_and_wait(
        &self,
        event: &str,
        context: RunContext,
        data: DataBag,
    ) -> Result<usize, FlowError> {
        let handles = self.emit(event, context, data);
        let started = handles.len();
        for handle in handles {
            handle
                .await
                .map_err(|e| FlowError::Execution(format!("run triggered by {} aborted: {}", event, e)))?;
        }
        Ok(started)
    }

    /// Level to resume `sequence_id` from, judged by which members already
    /// left a key (or key prefix) in `data`.
    pub fn resume_point(&self, sequence_id: &str, data: &DataBag) -> Result<usize, FlowError> {
        let dag = self.levels(sequence_id)?;
        Ok(dag.resume_index(|member| data.keys().any(|key| key.starts_with(member))))
    }

    pub fn levels(&self, sequence_id: &str) -> Result<&CompiledDag, FlowError> {
        self.inner
            .entries
            .get(sequence_id)
            .and_then(Entry::as_sequence)
            .map(SequenceExecutor::dag)
            .ok_or_else(|| FlowError::NotFound(sequence_id.to_string()))
    }

    pub fn kind(&self, id: &str) -> Option<EntryKind> {
        self.inner.entries.get(id).map(Entry::kind)
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.inner.entries.get(id)
    }

    /// All registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn triggers(&self) -> &BTreeMap<String, Vec<String>> {
        self.inner.events.triggers()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    fn handle(&self) -> Arc<dyn Dispatch> {
        Arc::new(self.clone())
    }

    fn attach(&self, context: RunContext) -> RunContext {
        let run_id = context.run_id.unwrap_or_else(Uuid::new_v4);
        context.with_run(self.handle()).with_run_id(run_id)
    }
}

#[async_trait]
impl Dispatch for FlowRuntime {
    async fn run(&self, id: &str, context: RunContext, data: DataBag) -> Result<Value, FlowError> {
        FlowRuntime::run(self, id, context, data).await
    }
}
