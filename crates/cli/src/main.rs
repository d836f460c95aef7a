//! GENESIS CLI - run cycles and inspect the genome population.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genesis_core::{EnvironmentContext, ExecutorKind, GenomeStatus};
use genesis_cycle::{stop_signal, CycleController};
use genesis_evolution::Evolver;
use genesis_execution::{default_founders, seed_founders, ExecutorPool, ExecutorRegistry, Population, Router};
use genesis_provider::{EchoProvider, InMemoryBus, InferenceProvider, StaticEnvironment};
use genesis_storage::{GenomeStore, JsonStore, OutcomeStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::FileConfig;

#[derive(Parser)]
#[command(name = "genesis")]
#[command(about = "Self-evolving task orchestration", long_about = None)]
struct Cli {
    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file (durations in milliseconds)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run cycles
    Run {
        /// Number of cycles to run (default: until Ctrl-C)
        #[arg(long)]
        cycles: Option<u64>,
        /// Pause between cycles, in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Requests served one per cycle
        #[arg(long)]
        request: Vec<String>,
    },
    /// Mutate every active genome now
    Evolve,
    /// Show the lineage of an executor kind
    Lineage {
        /// Executor kind
        kind: ExecutorKind,
    },
    /// Show recent evolution events
    Events {
        /// Number of events
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let data_dir = cli
        .data_dir
        .clone()
        .or_else(|| file.data_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(".genesis"));

    let store = Arc::new(
        JsonStore::open(&data_dir)
            .await
            .with_context(|| format!("opening store at {}", data_dir.display()))?,
    );
    let seeded = seed_founders(store.as_ref(), default_founders()).await?;
    if seeded > 0 {
        info!(seeded, "seeded founder genomes");
    }

    match cli.command {
        Commands::Run {
            cycles,
            interval_ms,
            request,
        } => {
            let mut controller_config = file.controller();
            if let Some(cycles) = cycles {
                controller_config = controller_config.with_max_cycles(cycles);
            }
            if let Some(ms) = interval_ms {
                controller_config = controller_config.with_cycle_interval(Duration::from_millis(ms));
            }

            let mut controller = build_controller(&file, store, request, controller_config).await?;
            let (handle, stop) = stop_signal();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, finishing current cycle");
                    handle.stop();
                }
            });

            let ran = controller.run(stop).await;
            let status = controller.status();
            println!(
                "Ran {} cycles ({} degraded) in {:.1}s",
                ran,
                status.degraded_cycles,
                status.uptime.as_secs_f64()
            );
        }
        Commands::Evolve => {
            let config = file.controller();
            let mut controller = build_controller(&file, store, Vec::new(), config).await?;
            let events = controller.force_evolve().await?;
            println!("Evolution events ({})", events.len());
            for event in events {
                println!(
                    "  {} | {} | {:?} | {}",
                    event.kind, event.name, event.outcome, event.detail
                );
            }
        }
        Commands::Lineage { kind } => {
            let lineage = store.list_lineage(kind).await?;
            println!("Lineage of {} ({})", kind, lineage.len());
            for genome in lineage {
                let marker = match genome.status {
                    GenomeStatus::Active => "*",
                    GenomeStatus::Retired => " ",
                };
                println!(
                    " {} gen {} | {} | {} | parent {}",
                    marker,
                    genome.generation,
                    genome.id,
                    genome.name,
                    genome.parent_id.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                );
            }
        }
        Commands::Events { limit } => {
            let events = store.list_events(limit).await?;
            println!("Evolution events ({})", events.len());
            for event in events {
                println!(
                    "  #{} | {} | {} | {:?} | {} | {}",
                    event.seq, event.timestamp, event.kind, event.outcome, event.trigger_reason, event.detail
                );
            }
        }
        Commands::Status => {
            let memory = store.memory_state().await?;
            println!("GENESIS Status ({})", data_dir.display());
            println!("  Cycles: {}", memory.total_cycles);
            println!("  Success rate: {:.2}", memory.success_rate);
            for kind in ExecutorKind::ALL {
                let active = store.list_active(kind).await?;
                let generations = active
                    .iter()
                    .map(|g| format!("{}@{}", g.name, g.generation))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("  {}: {}", kind, if generations.is_empty() { "-".into() } else { generations });
            }
            if !memory.recent_errors.is_empty() {
                println!("  Recent errors:");
                for error in &memory.recent_errors {
                    println!("    {}", error);
                }
            }
        }
    }

    Ok(())
}

/// Wire the offline stack: echo provider, static environment, in-process bus.
async fn build_controller(
    file: &FileConfig,
    store: Arc<JsonStore>,
    requests: Vec<String>,
    config: genesis_cycle::ControllerConfig,
) -> Result<CycleController> {
    let provider: Arc<dyn InferenceProvider> = Arc::new(EchoProvider::new());
    let population = Arc::new(Population::load(store.as_ref()).await?);

    let pool = ExecutorPool::new(file.pool()?, ExecutorRegistry::standard(), provider.clone(), population.clone())
        .with_store(store.clone());
    let router = Arc::new(Router::new(provider.clone(), Arc::new(pool), file.router()));
    let evolver = Arc::new(Evolver::new(store.clone(), provider, population, file.evolver()));

    let base = match &file.request {
        Some(request) => EnvironmentContext::with_request(request.clone()),
        None => EnvironmentContext::default(),
    };
    let environment = Arc::new(StaticEnvironment::new(base).with_requests(requests));

    let controller = CycleController::new(environment, router, evolver, store as Arc<dyn OutcomeStore>, config)?
        .with_bus(Arc::new(InMemoryBus::default()));
    Ok(controller)
}
