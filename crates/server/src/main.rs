//! AgentFlow Server
//!
//! Axum server over one `FlowEngine`, plus CLI commands that drive the
//! engine directly without a server.

use agentflow_core::config::EngineConfig;
use agentflow_core::engine::{AgentPipeline, AgentRun, FlowEngine, FlowEventKind, Launch};
use agentflow_core::orchestrator::PipelineDetection;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;

use api::{AppState, SharedState};

#[derive(Parser, Clone)]
#[command(author, version, about = "AgentFlow - compose agents into workflows and pipelines")]
struct Args {
    /// JSON engine configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the AgentFlow server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// List agent types
    Agents,
    /// Show which agents a task description routes to
    Detect {
        /// Task description
        text: String,
    },
    /// Run one agent on a task and follow it to the end
    Run {
        /// Agent type id
        agent: String,
        /// Task description
        task: String,
    },
    /// Route a task description and follow whatever it starts
    Pipeline {
        /// Task description
        text: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agentflow_core=info,agentflow_server=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Open the engine with whatever state the store holds
async fn open_engine(config: &EngineConfig) -> anyhow::Result<FlowEngine> {
    let engine = FlowEngine::new(config)?;
    if let Err(e) = engine.rehydrate().await {
        tracing::warn!(error = %e, "Could not restore saved state; starting fresh");
    }
    Ok(engine)
}

pub async fn run_server(config: &EngineConfig, port: u16) -> anyhow::Result<()> {
    let engine = open_engine(config).await?;

    let state: SharedState = Arc::new(AppState { engine });
    let autosave = api::events::spawn_autosave(state.clone());
    let app = api::router(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("AgentFlow server running at http://{}", addr);
    println!("   Catalog:   /api/v1/agents, /api/v1/templates");
    println!("   Routing:   /api/v1/orchestrate/detect, /launch");
    println!("   Canvas:    /api/v1/canvas, /execute, /stop, /pipeline");
    println!("   Runs:      /api/v1/runs");
    println!("   Pipelines: /api/v1/pipelines");
    println!("   Events:    /api/v1/events (SSE)");
    println!("   OpenAPI:   /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    autosave.abort();
    state.engine.persist_all().await?;
    tracing::info!("State saved; shutting down");
    Ok(())
}

fn print_detection(detection: &PipelineDetection) {
    if detection.is_empty() {
        println!("No agent matched.");
        return;
    }
    let rule = detection.matched_rule.as_deref().unwrap_or("keywords");
    println!(
        "{} (confidence {:.2}, rule: {})",
        detection.agents.join(" -> "),
        detection.confidence,
        rule
    );
}

fn print_run(run: &AgentRun) {
    let done = run.completed_steps();
    println!("[{:?}] {} {}/{} steps", run.status, run.agent_type, done, run.steps.len());
}

fn print_pipeline(pipeline: &AgentPipeline) {
    let stages: Vec<String> = pipeline
        .stages
        .iter()
        .map(|s| format!("{}:{:?}", s.agent_type, s.status))
        .collect();
    println!("[{:?}] {}  {}", pipeline.status, pipeline.name, stages.join(" | "));
}

/// Print run updates until the run is terminal
async fn follow_run(engine: &FlowEngine, run: AgentRun) -> anyhow::Result<()> {
    print_run(&run);
    let mut events = BroadcastStream::new(engine.subscribe());
    let run_id = run.id;
    // The run may have moved on before the subscription existed
    if let Some(current) = engine.runs().run(&run_id).filter(|r| r.status.is_terminal()) {
        print_run(&current);
        println!("{}", current.result.unwrap_or_default());
        return Ok(());
    }

    while let Some(event) = events.next().await {
        let Ok(event) = event else { continue };
        if let FlowEventKind::RunUpdated { run } = event.kind {
            if run.id != run_id {
                continue;
            }
            print_run(&run);
            if run.status.is_terminal() {
                println!("{}", run.result.unwrap_or_default());
                break;
            }
        }
    }
    Ok(())
}

/// Print pipeline updates until the pipeline is terminal
async fn follow_pipeline(engine: &FlowEngine, pipeline: AgentPipeline) -> anyhow::Result<()> {
    print_pipeline(&pipeline);
    let mut events = BroadcastStream::new(engine.subscribe());
    let pipeline_id = pipeline.id;
    if let Some(current) = engine
        .pipelines()
        .pipeline(&pipeline_id)
        .filter(|p| p.is_complete())
    {
        print_pipeline(&current);
        return Ok(());
    }

    while let Some(event) = events.next().await {
        let Ok(event) = event else { continue };
        if let FlowEventKind::PipelineUpdated { pipeline } = event.kind {
            if pipeline.id != pipeline_id {
                continue;
            }
            print_pipeline(&pipeline);
            if pipeline.is_complete() {
                for stage in &pipeline.stages {
                    if let Some(output) = &stage.output {
                        println!("  {}: {}", stage.agent_type, output);
                    }
                }
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref())?;

    match args.command.unwrap_or(CliCommand::Serve { port: 8080 }) {
        CliCommand::Serve { port } => run_server(&config, port).await,
        CliCommand::Agents => {
            let engine = FlowEngine::new(&config)?;
            for agent in engine.catalog().list() {
                let steps: Vec<&str> = agent.default_steps.iter().map(|s| s.label.as_str()).collect();
                println!("{:<12} {:<12} {}", agent.id, agent.category, steps.join(", "));
            }
            Ok(())
        }
        CliCommand::Detect { text } => {
            let engine = FlowEngine::new(&config)?;
            print_detection(&engine.detect_pipeline(&text));
            Ok(())
        }
        CliCommand::Run { agent, task } => {
            let engine = open_engine(&config).await?;
            let run = engine.runs().start_agent(&agent, &task)?;
            follow_run(&engine, run).await?;
            engine.persist_all().await
        }
        CliCommand::Pipeline { text } => {
            let engine = open_engine(&config).await?;
            let launched = engine.launch(&text)?;
            match launched {
                Launch::Nothing { detection } => print_detection(&detection),
                Launch::Run { detection, run } => {
                    print_detection(&detection);
                    follow_run(&engine, run).await?;
                }
                Launch::Pipeline {
                    detection,
                    pipeline,
                } => {
                    print_detection(&detection);
                    follow_pipeline(&engine, pipeline).await?;
                }
            }
            engine.persist_all().await
        }
    }
}
