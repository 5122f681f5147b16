// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{
    BroadcastStreams, DataBag, LifecycleEvent, NodeSpec, QueueConfig, RunContext, SequenceSpec,
    StreamEvent, UnitSet, Value,
};
use flowruntime::{load_units, FlowRuntime, FunctionRegistry, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node or sequence by id
    Run {
        /// Unit file or directory of unit files
        #[arg(short, long)]
        units: PathBuf,

        /// Node or sequence id
        #[arg(long)]
        id: String,

        /// Input data as JSON object
        #[arg(short, long)]
        data: Option<String>,

        /// Project name handed to streams
        #[arg(short, long)]
        project: Option<String>,

        /// Level to resume a sequence from
        #[arg(long, conflicts_with = "auto_resume")]
        resume: Option<usize>,

        /// Derive the resume level from the keys already present in --data
        #[arg(long)]
        auto_resume: bool,
    },

    /// Load unit files and compile every sequence
    Validate {
        #[arg(short, long)]
        units: PathBuf,
    },

    /// Fire a named event and wait for the triggered sequences
    Emit {
        #[arg(short, long)]
        units: PathBuf,

        #[arg(short, long)]
        event: String,

        #[arg(short, long)]
        data: Option<String>,

        /// How long to wait for triggered runs
        #[arg(long, default_value_t = 30_000)]
        wait_ms: u64,
    },

    /// List available work functions
    Nodes,

    /// Write an example unit file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "units.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            units,
            id,
            data,
            project,
            resume,
            auto_resume,
        } => run_unit(&units, &id, data, project, resume, auto_resume).await?,
        Commands::Validate { units } => validate_units(&units)?,
        Commands::Emit {
            units,
            event,
            data,
            wait_ms,
        } => emit_event(&units, &event, data, wait_ms).await?,
        Commands::Nodes => list_nodes(),
        Commands::Init { output } => create_example_units(&output)?,
    }

    Ok(())
}

fn functions() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    flownodes::register_all(&mut registry);
    registry
}

fn build_runtime(units: &Path) -> Result<FlowRuntime> {
    println!("🚀 Loading units from: {}", units.display());
    let units = load_units(units).with_context(|| format!("loading {}", units.display()))?;
    let runtime = FlowRuntime::build(units, &functions(), RuntimeConfig::from_env())?;
    Ok(runtime)
}

fn parse_data(data: Option<String>) -> Result<DataBag> {
    let Some(raw) = data else {
        return Ok(DataBag::new());
    };
    let json: Value = serde_json::from_str(&raw).context("--data is not valid JSON")?;
    match DataBag::from_value(json) {
        Some(bag) => Ok(bag),
        None => bail!("--data must be a JSON object"),
    }
}

/// Print lifecycle and stream events until aborted.
fn spawn_printer(runtime: &FlowRuntime, streams: &BroadcastStreams) -> JoinHandle<()> {
    let mut events = runtime.subscribe_events();
    let mut stream_events = streams.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => print_lifecycle(&event),
                    Err(RecvError::Lagged(n)) => println!("  ⚠️  {} lifecycle event(s) dropped", n),
                    Err(RecvError::Closed) => break,
                },
                event = stream_events.recv() => match event {
                    Ok(event) => print_stream(&event),
                    Err(RecvError::Lagged(n)) => println!("  ⚠️  {} stream event(s) dropped", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

fn print_lifecycle(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::SequenceStarted { id, .. } => println!("▶️  Sequence {} started", id),
        LifecycleEvent::StepStarted { id, index, over, .. } => {
            println!("  ⏩ {} level {}/{}", id, index + 1, over)
        }
        LifecycleEvent::NodeStarted { id, .. } => println!("  ⚡ Starting node: {}", id),
        LifecycleEvent::NodeRetrying { id, attempt, error, .. } => {
            println!("  🔁 Node {} retrying (attempt {}): {}", id, attempt, error)
        }
        LifecycleEvent::NodeCompleted { id, duration_ms, .. } => {
            println!("  ✅ Node {} completed in {}ms", id, duration_ms)
        }
        LifecycleEvent::NodeFailed { id, attempts, error, .. } => {
            println!("  ❌ Node {} failed after {} attempt(s): {}", id, attempts, error)
        }
        LifecycleEvent::SequenceCompleted { id, duration_ms, .. } => {
            println!("✨ Sequence {} completed in {}ms", id, duration_ms)
        }
        LifecycleEvent::NodeEnqueued { .. } | LifecycleEvent::StepCompleted { .. } => {}
    }
}

fn print_stream(event: &StreamEvent) {
    match event {
        StreamEvent::Start { key, .. } => println!("     📡 [{}] stream opened", key),
        StreamEvent::Data { key, data, .. } | StreamEvent::Update { key, data, .. } => {
            println!("     📡 [{}] {}", key, data)
        }
        StreamEvent::End { key, .. } => println!("     📡 [{}] stream closed", key),
    }
}

async fn run_unit(
    units: &Path,
    id: &str,
    data: Option<String>,
    project: Option<String>,
    resume: Option<usize>,
    auto_resume: bool,
) -> Result<()> {
    let runtime = build_runtime(units)?;
    let data = parse_data(data)?;

    let streams = BroadcastStreams::new(256);
    let printer = spawn_printer(&runtime, &streams);

    let mut context = RunContext::new().with_streams(Arc::new(streams));
    if let Some(project) = project {
        context = context.with_project(project);
    }
    let resume = if auto_resume {
        Some(runtime.resume_point(id, &data)?)
    } else {
        resume
    };
    if let Some(level) = resume {
        println!("⏭️  Resuming {} from level {}", id, level);
        context = context.with_resume(level);
    }

    let result = runtime.run(id, context, data).await;

    // let the printer drain
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();

    let result = result?;
    println!();
    println!("📤 Result:");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn validate_units(units: &Path) -> Result<()> {
    println!("🔍 Validating units: {}", units.display());
    let runtime = build_runtime(units)?;

    println!("✅ Units are valid:");
    for id in runtime.ids() {
        match runtime.levels(&id) {
            Ok(dag) => {
                println!("   • {} (sequence, {} level(s))", id, dag.len());
                for (index, level) in dag.levels().iter().enumerate() {
                    println!("       {}: {}", index, level.join(", "));
                }
            }
            Err(_) => println!("   • {} (node)", id),
        }
    }
    for (event, targets) in runtime.triggers() {
        println!("   ⚡ {} → {}", event, targets.join(", "));
    }
    Ok(())
}

async fn emit_event(units: &Path, event: &str, data: Option<String>, wait_ms: u64) -> Result<()> {
    let runtime = build_runtime(units)?;
    let data = parse_data(data)?;

    let streams = BroadcastStreams::new(256);
    let printer = spawn_printer(&runtime, &streams);

    let context = RunContext::new().with_streams(Arc::new(streams));
    let outcome = timeout(
        Duration::from_millis(wait_ms),
        runtime.emit_and_wait(event, context, data),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();

    match outcome {
        Ok(Ok(0)) => println!("⚠️  No sequence listens to {}", event),
        Ok(Ok(n)) => println!("✨ {} triggered {} run(s)", event, n),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => bail!("triggered runs still in flight after {}ms", wait_ms),
    }
    Ok(())
}

fn list_nodes() {
    println!("📦 Available work functions:");
    println!();

    let registry = functions();
    for id in registry.list() {
        if let Some(metadata) = registry.metadata(&id) {
            println!("  • {} ({})", id, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", id);
        }
    }
}

fn create_example_units(output: &Path) -> Result<()> {
    let mut units = UnitSet::new();
    units
        .add_node(
            NodeSpec::new("example.seed")
                .with_function("data.constant")
                .with_config("message", "hello from flow")
                .with_config("delay_ms", 250),
        )
        .add_node(
            NodeSpec::new("example.wait")
                .with_function("time.delay")
                .with_inputs(["delay_ms", "message"])
                .with_queue(QueueConfig::default().concurrency(1)),
        )
        .add_node(
            NodeSpec::new("example.log")
                .with_function("debug.log")
                .with_inputs(["message"])
                .with_outputs(["message"]),
        )
        .add_sequence(
            SequenceSpec::new("seq:example")
                .with_nodes(["example.seed", "example.wait", "example.log"])
                .with_parents("example.wait", ["example.seed"])
                .with_parents("example.log", ["example.wait"])
                .with_trigger("example:start"),
        );

    let json = serde_json::to_string_pretty(&units)?;
    std::fs::write(output, json)?;

    println!("✨ Created example units: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --units {} --id seq:example", output.display());
    println!("  flow emit --units {} --event example:start", output.display());
    Ok(())
}
