//! Thin `clap` CLI over `elf-runtime`: one subcommand per component surface.

use clap::{Parser, Subcommand};
use elf_runtime::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "elf", version, about = "learning-aware agent orchestration substrate")]
struct Cli {
    /// Override <elf-base> (defaults to <project-root>/.elf)
    #[arg(long, global = true)]
    elf_base: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Event log operations
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Blackboard operations
    Board {
        #[command(subcommand)]
        action: BoardAction,
    },
    /// Knowledge store operations
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Heuristic lifecycle engine
    Lifecycle {
        #[command(subcommand)]
        action: LifecycleAction,
    },
    /// Fraud detector
    Fraud {
        #[command(subcommand)]
        action: FraudAction,
    },
    /// Meta-observer
    Observe {
        #[command(subcommand)]
        action: ObserveAction,
    },
    /// Workflow conductor
    Conductor {
        #[command(subcommand)]
        action: ConductorAction,
    },
    /// Context builder
    Context {
        /// Task description to build context for
        task: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long, default_value_t = 8000)]
        max_tokens: usize,
        #[arg(long, default_value = "standard")]
        depth: String,
    },
    /// Replay & workflow run recovery
    Replay {
        #[command(subcommand)]
        action: ReplayAction,
    },
    /// Advisory safety scan of a diff
    Scan { old_file: PathBuf, new_file: PathBuf },
}

#[derive(Subcommand)]
enum EventsAction {
    Append { event_type: String, data: String },
    Read { since_seq: u64 },
    State,
}

#[derive(Subcommand)]
enum BoardAction {
    Snapshot,
    Finding { agent_id: String, content: String },
}

#[derive(Subcommand)]
enum MemoryAction {
    ListHeuristics {
        domain: String,
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
enum LifecycleAction {
    Maintenance,
    MakeDormant { heuristic_id: String },
    Revive { heuristic_id: String },
}

#[derive(Subcommand)]
enum FraudAction {
    Check { heuristic_id: String },
}

#[derive(Subcommand)]
enum ObserveAction {
    Trend {
        metric: String,
        #[arg(long, default_value_t = 24)]
        window_hours: i64,
    },
}

#[derive(Subcommand)]
enum ConductorAction {
    Hotspots {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ReplayAction {
    Plan {
        run_id: String,
        #[arg(long)]
        from_node: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("{}", err.render());
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CoreError> {
    let elf_base = cli
        .elf_base
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(".elf"));
    let config = Config::load(&elf_base).map_err(CoreError::Configuration)?;
    let core = elf_runtime::Core::new(config)?;

    match cli.command {
        Commands::Events { action } => match action {
            EventsAction::Append { event_type, data } => {
                let ty = parse_event_type(&event_type);
                let value: serde_json::Value = serde_json::from_str(&data).unwrap_or(serde_json::Value::Null);
                let seq = core.events.append(ty, value)?;
                println!("{{\"seq\":{seq}}}");
            }
            EventsAction::Read { since_seq } => {
                let events = core.events.read(since_seq)?;
                println!("{}", serde_json::to_string_pretty(&events).unwrap());
            }
            EventsAction::State => {
                let state = core.events.current_state(true)?;
                println!("{}", serde_json::to_string_pretty(&state).unwrap());
            }
        },
        Commands::Board { action } => match action {
            BoardAction::Snapshot => {
                let state = core.board.snapshot()?;
                println!("{}", serde_json::to_string_pretty(&state).unwrap());
            }
            BoardAction::Finding { agent_id, content } => {
                let id = core.board.add_finding(
                    &agent_id,
                    FindingType::Note,
                    &content,
                    vec![],
                    Importance::Normal,
                    vec![],
                    None,
                )?;
                println!("{{\"finding_id\":\"{id}\"}}");
            }
        },
        Commands::Memory { action } => match action {
            MemoryAction::ListHeuristics { domain, status } => {
                let heuristics = core.knowledge.list_heuristics_by_domain(&domain, status.as_deref()).await?;
                println!("{}", serde_json::to_string_pretty(&heuristics).unwrap());
            }
        },
        Commands::Lifecycle { action } => match action {
            LifecycleAction::Maintenance => {
                let report = core.lifecycle.run_maintenance().await?;
                println!("{report:#?}");
            }
            LifecycleAction::MakeDormant { heuristic_id } => {
                core.lifecycle.make_dormant(&heuristic_id).await?;
                println!("{{\"heuristic_id\":\"{heuristic_id}\",\"status\":\"dormant\"}}");
            }
            LifecycleAction::Revive { heuristic_id } => {
                core.lifecycle.revive_heuristic(&heuristic_id).await?;
                println!("{{\"heuristic_id\":\"{heuristic_id}\",\"status\":\"active\"}}");
            }
        },
        Commands::Fraud { action } => match action {
            FraudAction::Check { heuristic_id } => {
                let assessment = core.fraud.check_heuristic(&heuristic_id).await?;
                println!("{assessment:#?}");
            }
        },
        Commands::Observe { action } => match action {
            ObserveAction::Trend { metric, window_hours } => {
                let trend = core.observer.trend(&metric, window_hours).await?;
                println!("{trend:#?}");
            }
        },
        Commands::Conductor { action } => match action {
            ConductorAction::Hotspots { limit } => {
                let spots = core.conductor.get_hot_spots(limit).await?;
                println!("{spots:#?}");
            }
        },
        Commands::Context { task, domain, max_tokens, depth } => {
            let depth = match depth.as_str() {
                "minimal" => elf_runtime::context::Depth::Minimal,
                "deep" => elf_runtime::context::Depth::Deep,
                _ => elf_runtime::context::Depth::Standard,
            };
            let text = core
                .context
                .build(elf_runtime::context::BuildRequest {
                    task,
                    domain,
                    tags: vec![],
                    max_tokens,
                    depth,
                    project_name: None,
                    project_root: None,
                    project_domains: vec![],
                    context_md: None,
                    golden_rules: None,
                    custom_golden_rules: None,
                    always_load_categories: vec![],
                    session_id: None,
                })
                .await?;
            println!("{text}");
        }
        Commands::Replay { action } => match action {
            ReplayAction::Plan { run_id, from_node } => {
                let plan = core.replay.get_replay_plan(&run_id, from_node.as_deref()).await?;
                println!(
                    "{}",
                    serde_json::json!({
                        "run_id": plan.run_id,
                        "context": plan.context,
                        "replayed": plan.replayed,
                        "skipped": plan.skipped,
                    })
                );
            }
        },
        Commands::Scan { old_file, new_file } => {
            let old = std::fs::read_to_string(&old_file).unwrap_or_default();
            let new = std::fs::read_to_string(&new_file).unwrap_or_default();
            let path = new_file.display().to_string();
            let hits = core.safety.scan_write(&path, &old, &new).await;
            println!("{{\"advisories\":{}}}", hits.len());
        }
    }
    Ok(())
}

fn parse_event_type(s: &str) -> EventType {
    match s {
        "agent.registered" => EventType::AgentRegistered,
        "agent.status_updated" => EventType::AgentStatusUpdated,
        "agent.cursor_updated" => EventType::AgentCursorUpdated,
        "agent.heartbeat" => EventType::AgentHeartbeat,
        "finding.added" => EventType::FindingAdded,
        "message.sent" => EventType::MessageSent,
        "message.read" => EventType::MessageRead,
        "task.added" => EventType::TaskAdded,
        "task.claimed" => EventType::TaskClaimed,
        "task.completed" => EventType::TaskCompleted,
        "question.asked" => EventType::QuestionAsked,
        "question.answered" => EventType::QuestionAnswered,
        _ => EventType::ContextSet,
    }
}
