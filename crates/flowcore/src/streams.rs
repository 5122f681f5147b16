//! Streaming collaborator invoked by work functions through `RunContext`.
//!
//! The engine never waits on these for correctness; implementations should
//! swallow their own delivery failures.

use crate::value::Value;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[async_trait]
pub trait Streams: Send + Sync {
    /// Announce the beginning of a named streamed artifact.
    async fn start(&self, project: &str, key: &str, meta: Value);

    /// Append a chunk.
    async fn write(&self, project: &str, key: &str, data: Value);

    /// Announce completion.
    async fn end(&self, project: &str, key: &str);

    /// Announce a discrete state change.
    async fn update(&self, project: &str, key: &str, data: Value);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStreams;

#[async_trait]
impl Streams for NoopStreams {
    async fn start(&self, _project: &str, _key: &str, _meta: Value) {}
    async fn write(&self, _project: &str, _key: &str, _data: Value) {}
    async fn end(&self, _project: &str, _key: &str) {}
    async fn update(&self, _project: &str, _key: &str, _data: Value) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        project: String,
        key: String,
        meta: Value,
        timestamp: DateTime<Utc>,
    },
    Data {
        project: String,
        key: String,
        data: Value,
    },
    End {
        project: String,
        key: String,
        timestamp: DateTime<Utc>,
    },
    Update {
        project: String,
        key: String,
        data: Value,
    },
}

impl StreamEvent {
    pub fn project(&self) -> &str {
        match self {
            StreamEvent::Start { project, .. }
            | StreamEvent::Data { project, .. }
            | StreamEvent::End { project, .. }
            | StreamEvent::Update { project, .. } => project,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StreamEvent::Start { key, .. }
            | StreamEvent::Data { key, .. }
            | StreamEvent::End { key, .. }
            | StreamEvent::Update { key, .. } => key,
        }
    }
}

/// Fans stream calls out to in-process subscribers.
#[derive(Clone)]
pub struct BroadcastStreams {
    sender: broadcast::Sender<StreamEvent>,
}

impl BroadcastStreams {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    fn send(&self, event: StreamEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl Streams for BroadcastStreams {
    async fn start(&self, project: &str, key: &str, meta: Value) {
        self.send(StreamEvent::Start {
            project: project.to_string(),
            key: key.to_string(),
            meta,
            timestamp: Utc::now(),
        });
    }

    async fn write(&self, project: &str, key: &str, data: Value) {
        self.send(StreamEvent::Data {
            project: project.to_string(),
            key: key.to_string(),
            data,
        });
    }

    async fn end(&self, project: &str, key: &str) {
        self.send(StreamEvent::End {
            project: project.to_string(),
            key: key.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn update(&self, project: &str, key: &str, data: Value) {
        self.send(StreamEvent::Update {
            project: project.to_string(),
            key: key.to_string(),
            data,
        });
    }
}
