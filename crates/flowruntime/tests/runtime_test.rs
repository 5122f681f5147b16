// crates/flowruntime/tests/runtime_test.rs

use flowcore::{
    node_fn, BroadcastStreams, ConfigError, DataBag, FlowError, LifecycleEvent, NodeContext,
    NodeError, NodeSpec, QueueConfig, RunContext, SequenceSpec, StreamEvent, UnitSet, Value,
};
use flowruntime::{EntryKind, FlowRuntime, FunctionRegistry, RuntimeConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration, Instant};

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        default_retry_delay_ms: 0,
        ..RuntimeConfig::default()
    }
}

/// Records every invocation (id + input) and answers with a fixed value.
#[derive(Clone, Default)]
struct Calls(Arc<Mutex<Vec<(String, Value)>>>);

impl Calls {
    fn responder(&self, response: Value) -> Arc<dyn flowcore::Node> {
        let calls = self.clone();
        node_fn(move |ctx: NodeContext| {
            let calls = calls.clone();
            let response = response.clone();
            async move {
                calls.0.lock().unwrap().push((ctx.id.clone(), ctx.data.into_value()));
                Ok::<_, NodeError>(response)
            }
        })
    }

    fn ids(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    fn input_of(&self, id: &str) -> Option<Value> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(called, _)| called == id)
            .map(|(_, input)| input.clone())
    }
}

fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn fan_in_merges_level_outputs_before_next_level() {
    init_tracing();
    let calls = Calls::default();
    let mut functions = FunctionRegistry::new();
    functions.register("A", calls.responder(json!({"x": 1})));
    functions.register("B", calls.responder(json!({"y": 2})));
    functions.register("C", calls.responder(json!({"done": true})));

    let mut units = UnitSet::new();
    units
        .add_node(NodeSpec::new("A"))
        .add_node(NodeSpec::new("B"))
        .add_node(NodeSpec::new("C"))
        .add_sequence(
            SequenceSpec::new("seq")
                .with_nodes(["A", "B", "C"])
                .with_parents("C", ["A", "B"]),
        );
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();

    assert_eq!(
        runtime.levels("seq").unwrap().levels(),
        &[vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]]
    );

    let out = runtime.run("seq", RunContext::new(), DataBag::new()).await.unwrap();

    assert_eq!(calls.input_of("C"), Some(json!({"x": 1, "y": 2})));
    assert_eq!(calls.input_of("A"), Some(json!({})));
    assert_eq!(out, json!({"x": 1, "y": 2, "done": true}));
}

#[tokio::test]
async fn node_projection_through_runtime() {
    let seen = Arc::new(Mutex::new(None));
    let seen_in = seen.clone();
    let mut functions = FunctionRegistry::new();
    functions.register(
        "double",
        node_fn(move |ctx: NodeContext| {
            let seen = seen_in.clone();
            async move {
                *seen.lock().unwrap() = Some(ctx.data.clone().into_value());
                let x = ctx.require_input("x")?.as_i64().unwrap_or_default();
                Ok::<_, NodeError>(json!({"z": x * 2, "w": 99}))
            }
        }),
    );
    let mut units = UnitSet::new();
    units.add_node(NodeSpec::new("double").with_inputs(["x"]).with_outputs(["z"]));
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();

    let out = runtime
        .run("double", RunContext::new(), DataBag::new().with("x", 5).with("q", 7))
        .await
        .unwrap();
    assert_eq!(out, json!({"z": 10}));
    assert_eq!(seen.lock().unwrap().clone(), Some(json!({"x": 5})));
}

fn three_level_system(calls: &Calls) -> FlowRuntime {
    let mut functions = FunctionRegistry::new();
    functions.register("l0", calls.responder(json!({"l0": "done"})));
    functions.register("l1", calls.responder(json!({"l1": "done"})));
    functions.register("l2", calls.responder(json!({"l2": "done"})));
    let mut units = UnitSet::new();
    units
        .add_node(NodeSpec::new("l0"))
        .add_node(NodeSpec::new("l1"))
        .add_node(NodeSpec::new("l2"))
        .add_sequence(
            SequenceSpec::new("three")
                .with_nodes(["l0", "l1", "l2"])
                .with_parents("l1", ["l0"])
                .with_parents("l2", ["l1"]),
        );
    FlowRuntime::build(units, &functions, fast_config()).unwrap()
}

#[tokio::test]
async fn resume_skips_earlier_levels() {
    let calls = Calls::default();
    let runtime = three_level_system(&calls);
    let mut rx = runtime.subscribe_events();

    let prior = DataBag::new().with("l0", "from-storage");
    let out = runtime
        .run("three", RunContext::new().with_resume(1), prior)
        .await
        .unwrap();

    assert_eq!(calls.ids(), vec!["l1", "l2"]);
    assert_eq!(calls.input_of("l1"), Some(json!({"l0": "from-storage"})));
    assert_eq!(out, json!({"l0": "from-storage", "l1": "done", "l2": "done"}));

    let steps: Vec<usize> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::StepStarted { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec![1, 2]);
}

#[tokio::test]
async fn resume_point_follows_keys_in_bag() {
    let calls = Calls::default();
    let runtime = three_level_system(&calls);
    assert_eq!(runtime.resume_point("three", &DataBag::new()).unwrap(), 0);
    assert_eq!(
        runtime
            .resume_point("three", &DataBag::new().with("l0", 1).with("l1.latest", 1))
            .unwrap(),
        2
    );
    assert!(matches!(
        runtime.resume_point("l0", &DataBag::new()),
        Err(FlowError::NotFound(_))
    ));
}

#[tokio::test]
async fn unknown_id_is_a_lookup_error() {
    let runtime = FlowRuntime::build(UnitSet::new(), &FunctionRegistry::new(), fast_config()).unwrap();
    let err = runtime
        .run("nope", RunContext::new(), DataBag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotFound(id) if id == "nope"));
}

#[tokio::test]
async fn failing_level_stops_the_sequence() {
    init_tracing();
    let calls = Calls::default();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let mut functions = FunctionRegistry::new();
    functions.register("ok", calls.responder(json!({"ok": true})));
    functions.register(
        "bad",
        node_fn(move |_ctx: NodeContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Value, _>(NodeError::failed("model unavailable")) }
        }),
    );
    functions.register("after", calls.responder(json!({"after": true})));

    let mut units = UnitSet::new();
    units
        .add_node(NodeSpec::new("ok"))
        .add_node(NodeSpec::new("bad").with_queue(QueueConfig::default().retry(2, 0)))
        .add_node(NodeSpec::new("after"))
        .add_sequence(
            SequenceSpec::new("seq")
                .with_nodes(["ok", "bad", "after"])
                .with_parents("after", ["ok", "bad"]),
        );
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();
    let mut rx = runtime.subscribe_events();

    let err = runtime.run("seq", RunContext::new(), DataBag::new()).await.unwrap_err();

    assert_eq!(err.node_id(), Some("bad"));
    assert!(matches!(err, FlowError::Node { attempts: 3, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(calls.ids(), vec!["ok"]);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, LifecycleEvent::NodeFailed { id, .. } if id == "bad")));
    assert!(!events.iter().any(|e| matches!(e, LifecycleEvent::StepCompleted { .. })));
    assert!(!events.iter().any(|e| matches!(e, LifecycleEvent::SequenceCompleted { .. })));
}

#[tokio::test]
async fn sequences_nest_and_start_nested_levels_from_zero() {
    let calls = Calls::default();
    let mut functions = FunctionRegistry::new();
    functions.register("inner.a", calls.responder(json!({"a": 1})));
    functions.register("inner.b", calls.responder(json!({"b": 2})));
    functions.register("outer.first", calls.responder(json!({"first": true})));
    functions.register("outer.last", calls.responder(json!({"last": true})));

    let mut units = UnitSet::new();
    units
        .add_node(NodeSpec::new("inner.a"))
        .add_node(NodeSpec::new("inner.b"))
        .add_node(NodeSpec::new("outer.first"))
        .add_node(NodeSpec::new("outer.last"))
        .add_sequence(
            SequenceSpec::new("inner")
                .with_nodes(["inner.a", "inner.b"])
                .with_parents("inner.b", ["inner.a"]),
        )
        .add_sequence(
            SequenceSpec::new("outer")
                .with_nodes(["outer.first", "inner", "outer.last"])
                .with_parents("inner", ["outer.first"])
                .with_parents("outer.last", ["inner"]),
        );
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();
    assert_eq!(runtime.kind("inner"), Some(EntryKind::Sequence));
    assert_eq!(runtime.kind("inner.a"), Some(EntryKind::Node));

    let out = runtime
        .run("outer", RunContext::new().with_resume(1), DataBag::new())
        .await
        .unwrap();

    assert_eq!(calls.ids(), vec!["inner.a", "inner.b", "outer.last"]);
    assert_eq!(out, json!({"a": 1, "b": 2, "last": true}));
}

#[tokio::test]
async fn concurrency_one_serializes_parallel_members() {
    let spans = Arc::new(Mutex::new(Vec::new()));
    let recorded = spans.clone();
    let mut functions = FunctionRegistry::new();
    functions.register(
        "worker",
        node_fn(move |_ctx: NodeContext| {
            let spans = recorded.clone();
            async move {
                let start = Instant::now();
                sleep(Duration::from_millis(15)).await;
                spans.lock().unwrap().push((start, Instant::now()));
                Ok::<_, NodeError>(json!({}))
            }
        }),
    );
    let mut units = UnitSet::new();
    units.add_node(NodeSpec::new("worker").with_queue(QueueConfig::default().concurrency(1)));
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();

    let runs = (0..4).map(|_| runtime.run("worker", RunContext::new(), DataBag::new()));
    for result in futures::future::join_all(runs).await {
        result.unwrap();
    }

    let mut spans = spans.lock().unwrap().clone();
    assert_eq!(spans.len(), 4);
    spans.sort();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "two invocations overlapped");
    }
}

#[tokio::test]
async fn node_lifecycle_events_in_order() {
    let calls = Calls::default();
    let mut functions = FunctionRegistry::new();
    functions.register("n", calls.responder(json!({"v": 1})));
    let mut units = UnitSet::new();
    units.add_node(NodeSpec::new("n"));
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();
    let mut rx = runtime.subscribe_events();

    runtime
        .run("n", RunContext::new().with_project("demo"), DataBag::new().with("k", 1))
        .await
        .unwrap();

    let events = drain(&mut rx);
    let kinds: Vec<&str> = events.iter().map(LifecycleEvent::kind).collect();
    assert_eq!(kinds, vec!["node:enqueue", "node:start", "node:end"]);
    match &events[2] {
        LifecycleEvent::NodeCompleted {
            id,
            context,
            data,
            response,
            ..
        } => {
            assert_eq!(id, "n");
            assert_eq!(context.project.as_deref(), Some("demo"));
            assert!(context.run_id.is_some());
            assert!(context.run.is_none());
            assert_eq!(data.clone().into_value(), json!({"k": 1}));
            assert_eq!(response, &json!({"v": 1}));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn named_trigger_starts_listening_sequence() {
    let calls = Calls::default();
    let mut functions = FunctionRegistry::new();
    functions.register("setup", calls.responder(json!({"setup": true})));
    let mut units = UnitSet::new();
    units
        .add_node(NodeSpec::new("setup"))
        .add_sequence(
            SequenceSpec::new("seq:init")
                .with_nodes(["setup"])
                .with_trigger("project:init"),
        );
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();
    assert_eq!(
        runtime.triggers().get("project:init"),
        Some(&vec!["seq:init".to_string()])
    );

    let handles = runtime.emit("project:init", RunContext::new(), DataBag::new().with("pitch", "todo app"));
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(calls.input_of("setup"), Some(json!({"pitch": "todo app"})));
    assert!(runtime.emit("nobody:listens", RunContext::new(), DataBag::new()).is_empty());

    let started = runtime
        .emit_and_wait("project:init", RunContext::new(), DataBag::new().with("pitch", "again"))
        .await
        .unwrap();
    assert_eq!(started, 1);
    assert_eq!(calls.ids(), vec!["setup", "setup"]);
}

#[tokio::test]
async fn run_channel_swallows_failures() {
    let runtime = FlowRuntime::build(UnitSet::new(), &FunctionRegistry::new(), fast_config()).unwrap();
    let handle = runtime.dispatch("missing", RunContext::new(), DataBag::new());
    assert!(handle.await.is_ok());
}

#[tokio::test]
async fn work_functions_can_run_other_units_and_stream() {
    let calls = Calls::default();
    let mut functions = FunctionRegistry::new();
    functions.register("child", calls.responder(json!({"child": "ok"})));
    functions.register(
        "parent",
        node_fn(|ctx: NodeContext| async move {
            ctx.context.stream_start("parent", json!({"name": "parent"})).await;
            let child = ctx
                .context
                .run("child", ctx.data.clone())
                .await
                .map_err(|e| NodeError::failed(e.to_string()))?;
            ctx.context.stream_end("parent").await;
            Ok::<_, NodeError>(json!({"from_child": child}))
        }),
    );
    let mut units = UnitSet::new();
    units.add_node(NodeSpec::new("parent")).add_node(NodeSpec::new("child"));
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();

    let streams = BroadcastStreams::new(16);
    let mut stream_rx = streams.subscribe();
    let ctx = RunContext::new().with_project("p").with_streams(Arc::new(streams));

    let out = runtime.run("parent", ctx, DataBag::new()).await.unwrap();
    assert_eq!(out, json!({"from_child": {"child": "ok"}}));
    assert!(matches!(stream_rx.recv().await.unwrap(), StreamEvent::Start { .. }));
    assert!(matches!(stream_rx.recv().await.unwrap(), StreamEvent::End { .. }));
}

#[tokio::test]
async fn build_rejects_cycles_and_duplicate_ids() {
    let calls = Calls::default();
    let mut functions = FunctionRegistry::new();
    functions.register("a", calls.responder(json!({})));
    functions.register("b", calls.responder(json!({})));

    let mut cyclic = UnitSet::new();
    cyclic
        .add_node(NodeSpec::new("a"))
        .add_node(NodeSpec::new("b"))
        .add_sequence(
            SequenceSpec::new("loop")
                .with_nodes(["a", "b"])
                .with_parents("a", ["b"])
                .with_parents("b", ["a"]),
        );
    assert!(matches!(
        FlowRuntime::build(cyclic, &functions, fast_config()),
        Err(FlowError::Config(ConfigError::CyclicDependency { .. }))
    ));

    let mut clash = UnitSet::new();
    clash
        .add_node(NodeSpec::new("a"))
        .add_sequence(SequenceSpec::new("a").with_nodes(["b"]));
    assert!(matches!(
        FlowRuntime::build(clash, &functions, fast_config()),
        Err(FlowError::Config(ConfigError::DuplicateId(id))) if id == "a"
    ));
}

#[tokio::test]
async fn specs_without_functions_are_skipped_and_functions_can_be_shared() {
    let calls = Calls::default();
    let mut functions = FunctionRegistry::new();
    functions.register("shared", calls.responder(json!({"hit": true})));

    let mut units = UnitSet::new();
    units
        .add_node(NodeSpec::new("first").with_function("shared"))
        .add_node(NodeSpec::new("second").with_function("shared"))
        .add_node(NodeSpec::new("orphan"));
    let runtime = FlowRuntime::build(units, &functions, fast_config()).unwrap();

    assert_eq!(runtime.ids(), vec!["first", "second"]);
    runtime.run("second", RunContext::new(), DataBag::new()).await.unwrap();
    assert_eq!(calls.ids(), vec!["second"]);
}

#[tokio::test]
async fn execution_does_not_depend_on_listeners() {
    let calls = Calls::default();
    let quiet = three_level_system(&calls)
        .run("three", RunContext::new(), DataBag::new())
        .await
        .unwrap();

    let runtime = three_level_system(&calls);
    let _rx = runtime.subscribe_events();
    let logged = runtime.run("three", RunContext::new(), DataBag::new()).await.unwrap();
    assert_eq!(quiet, logged);

    let per_id: HashMap<String, usize> = calls.ids().into_iter().fold(HashMap::new(), |mut acc, id| {
        *acc.entry(id).or_default() += 1;
        acc
    });
    assert_eq!(per_id.values().copied().collect::<Vec<_>>(), vec![2, 2, 2]);
}
