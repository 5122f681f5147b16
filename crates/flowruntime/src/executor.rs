use crate::dag::CompiledDag;
use chrono::Utc;
use flowcore::value::snippet;
use flowcore::{
    ConfigError, DataBag, EventBus, FlowError, LifecycleEvent, RunContext, SequenceSpec, Value,
    SNIPPET_LEN,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Instant;

/// Walks a compiled sequence level by level.
///
/// Members of a level run concurrently on the calling task and receive the
/// same snapshot of the bag; their results are merged back as they arrive.
/// A failing member fails the level once its siblings have settled, and no
/// later level runs.
pub struct SequenceExecutor {
    spec: SequenceSpec,
    dag: CompiledDag,
    events: Arc<EventBus>,
}

impl SequenceExecutor {
    pub fn new(spec: SequenceSpec, events: Arc<EventBus>) -> Result<Self, ConfigError> {
        let dag = CompiledDag::compile(&spec)?;
        tracing::info!(
            "Compiled sequence {} into {} level(s): {:?}",
            spec.id,
            dag.len(),
            dag.levels()
        );
        Ok(Self { spec, dag, events })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &SequenceSpec {
        &self.spec
    }

    pub fn dag(&self) -> &CompiledDag {
        &self.dag
    }

    pub async fn run(&self, context: RunContext, data: DataBag) -> Result<Value, FlowError> {
        let dispatcher = context.dispatcher()?.clone();
        let id = self.id();
        let over = self.dag.len();
        let resume_at = context.resume_index();
        let started = Instant::now();

        if resume_at > 0 {
            tracing::info!("sequence {} resuming at level {}/{}", id, resume_at, over);
        }
        self.events.emit(LifecycleEvent::SequenceStarted {
            id: id.to_string(),
            context: context.detached(),
            data: data.clone(),
            timestamp: Utc::now(),
        });

        let member_context = context.for_member();
        let mut data = data;

        for (index, level) in self.dag.levels().iter().enumerate().skip(resume_at) {
            self.events.emit(LifecycleEvent::StepStarted {
                id: id.to_string(),
                index,
                over,
                context: context.detached(),
                data: data.clone(),
                timestamp: Utc::now(),
            });
            tracing::debug!("sequence {} level {} fan-out: {:?}", id, index, level);

            let snapshot = data.clone();
            let mut running: FuturesUnordered<_> = level
                .iter()
                .map(|member| {
                    let dispatcher = dispatcher.clone();
                    let context = member_context.clone();
                    let input = snapshot.clone();
                    async move { (member, dispatcher.run(member, context, input).await) }
                })
                .collect();

            let mut failure = None;
            while let Some((member, result)) = running.next().await {
                match result {
                    Ok(response) => {
                        if !data.merge(response) {
                            tracing::debug!("sequence {} : result of {} is not an object, not merged", id, member);
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            "sequence {} level {} member {} failed: {}\tdata: {}",
                            id,
                            index,
                            member,
                            e,
                            snippet(&snapshot, SNIPPET_LEN)
                        );
                        failure.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }

            self.events.emit(LifecycleEvent::StepCompleted {
                id: id.to_string(),
                index,
                over,
                context: context.detached(),
                data: data.clone(),
                timestamp: Utc::now(),
            });
        }

        self.events.emit(LifecycleEvent::SequenceCompleted {
            id: id.to_string(),
            context: context.detached(),
            data: data.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        Ok(data.into_value())
    }
}
