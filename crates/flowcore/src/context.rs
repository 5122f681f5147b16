use crate::streams::Streams;
use crate::value::{DataBag, Map, Value};
use crate::FlowError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Capability handle to the system-wide `run` entry point.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn run(&self, id: &str, context: RunContext, data: DataBag) -> Result<Value, FlowError>;
}

/// Resume position for a sequence run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct SequenceState {
    /// Zero-based level index to resume from.
    pub resume: usize,
}

/// Ambient values handed down a run. Cloned per level of recursion, never mutated in place.
#[derive(Clone, Default, Serialize)]
pub struct RunContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SequenceState>,

    /// Caller-defined extras.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map,

    #[serde(skip)]
    pub streams: Option<Arc<dyn Streams>>,

    #[serde(skip)]
    pub run: Option<Arc<dyn Dispatch>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_streams(mut self, streams: Arc<dyn Streams>) -> Self {
        self.streams = Some(streams);
        self
    }

    pub fn with_resume(mut self, level: usize) -> Self {
        self.sequence = Some(SequenceState { resume: level });
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_run(mut self, run: Arc<dyn Dispatch>) -> Self {
        self.run = Some(run);
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Level index to resume a sequence from; 0 when not resuming.
    pub fn resume_index(&self) -> usize {
        self.sequence.map(|s| s.resume).unwrap_or(0)
    }

    /// Copy handed to members of a sequence: same ambient values, no resume marker.
    pub fn for_member(&self) -> Self {
        Self {
            sequence: None,
            ..self.clone()
        }
    }

    /// Copy without the capability handles, for events and logs.
    pub fn detached(&self) -> Self {
        Self {
            streams: None,
            run: None,
            ..self.clone()
        }
    }

    pub fn dispatcher(&self) -> Result<&Arc<dyn Dispatch>, FlowError> {
        self.run.as_ref().ok_or(FlowError::NoDispatcher)
    }

    /// Run another node or sequence through the attached dispatcher.
    pub async fn run(&self, id: &str, data: DataBag) -> Result<Value, FlowError> {
        let dispatcher = self.dispatcher()?.clone();
        dispatcher.run(id, self.for_member(), data).await
    }

    fn project_key(&self) -> String {
        self.project.clone().unwrap_or_default()
    }

    pub async fn stream_start(&self, key: &str, meta: Value) {
        if let Some(streams) = &self.streams {
            streams.start(&self.project_key(), key, meta).await;
        }
    }

    pub async fn stream_write(&self, key: &str, data: Value) {
        if let Some(streams) = &self.streams {
            streams.write(&self.project_key(), key, data).await;
        }
    }

    pub async fn stream_end(&self, key: &str) {
        if let Some(streams) = &self.streams {
            streams.end(&self.project_key(), key).await;
        }
    }

    pub async fn stream_update(&self, key: &str, data: Value) {
        if let Some(streams) = &self.streams {
            streams.update(&self.project_key(), key, data).await;
        }
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("project", &self.project)
            .field("sequence", &self.sequence)
            .field("extra", &self.extra)
            .field("streams", &self.streams.is_some())
            .field("run", &self.run.is_some())
            .finish()
    }
}
