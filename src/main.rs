use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use opsfleet::api::{self, AppState};
use opsfleet::breaker::CircuitBreaker;
use opsfleet::config::FleetConfig;
use opsfleet::error::Result;
use opsfleet::gate::GateRegistry;
use opsfleet::heartbeat::Heartbeat;
use opsfleet::llm::{CompletionProvider, MockCompletion, ScriptedCompletion, TextCompletion};
use opsfleet::proposal::ProposalService;
use opsfleet::queue::StepQueue;
use opsfleet::reaction::ReactionEngine;
use opsfleet::roundtable::{ConversationScheduler, RoundtableOrchestrator};
use opsfleet::store::Store;
use opsfleet::trigger::TriggerEngine;
use opsfleet::voice::VoiceCache;
use opsfleet::worker::{ExecutorRegistry, MissionWorker, RoundtableWorker, ScheduledTask};

#[derive(Parser)]
#[command(name = "opsfleet", about = "Mission governance for a fleet of LLM-driven agents")]
struct Cli {
    /// Path to config.toml.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP JSON API.
    Serve,
    /// Run a polling worker process.
    Worker {
        #[command(subcommand)]
        kind: WorkerKind,
    },
    /// Run every maintenance pass once and print the report.
    Heartbeat,
    /// Create the store and seed default policies.
    Init,
}

#[derive(Subcommand)]
enum WorkerKind {
    /// Claim and execute mission steps.
    Mission,
    /// Claim and orchestrate pending conversations.
    Roundtable,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("opsfleet=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opsfleet=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = FleetConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Worker { kind } => match kind {
            WorkerKind::Mission => mission_worker(config).await,
            WorkerKind::Roundtable => roundtable_worker(config).await,
        },
        Commands::Heartbeat => heartbeat(config),
        Commands::Init => init(config).await,
    }
}

fn rng(config: &FleetConfig) -> StdRng {
    match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn completion(config: &FleetConfig) -> Arc<dyn TextCompletion> {
    match config.llm.provider {
        CompletionProvider::Mock => match &config.llm.mock_response {
            Some(response) => Arc::new(MockCompletion::new(response.clone())),
            None => Arc::new(MockCompletion::default()),
        },
        CompletionProvider::Scripted => Arc::new(ScriptedCompletion::new(Vec::<String>::new())),
    }
}

fn proposal_service(store: &Store) -> Arc<ProposalService> {
    Arc::new(ProposalService::new(
        store.clone(),
        Arc::new(GateRegistry::standard()),
    ))
}

fn build_heartbeat(config: &FleetConfig, store: &Store) -> Heartbeat {
    let proposals = proposal_service(store);
    Heartbeat::new(
        store.clone(),
        TriggerEngine::new(
            store.clone(),
            proposals.clone(),
            config.trigger.options(),
            rng(config),
        )
        .with_standard_checkers(),
        ReactionEngine::new(
            store.clone(),
            proposals,
            config.reaction.options(),
            rng(config),
        ),
        ConversationScheduler::new(store.clone(), rng(config)),
        config.memory.limits(),
    )
}

async fn serve(config: FleetConfig) -> Result<()> {
    let store = Store::open(&config.store.path)?;
    let state = AppState {
        proposals: proposal_service(&store),
        queue: Arc::new(StepQueue::new(store.clone())),
        breaker: Arc::new(CircuitBreaker::new(store.clone(), config.breaker.params())),
        heartbeat: Arc::new(Mutex::new(build_heartbeat(&config, &store))),
        memory_limits: config.memory.limits(),
        drift_bounds: config.relationship.bounds(),
        api_key: config.api.api_key.clone().map(Arc::new),
        store,
    };
    api::serve(state, &config.api.bind).await
}

async fn mission_worker(config: FleetConfig) -> Result<()> {
    let store = Store::open(&config.store.path)?;
    let worker = MissionWorker::new(
        store.clone(),
        CircuitBreaker::new(store, config.breaker.params()),
        Arc::new(ExecutorRegistry::standard()),
        completion(&config),
        config.worker.worker_id.clone(),
        config.worker.agent_id.clone(),
    );
    info!(worker_id = %config.worker.worker_id, "mission worker starting");

    let worker = Arc::new(worker);
    let interval = Duration::from_secs(config.worker.poll_interval_secs);
    let task = ScheduledTask::spawn("mission-worker", interval, move || {
        let worker = worker.clone();
        async move {
            if let Err(e) = worker.poll_once().await {
                error!(error = %e, "mission worker poll failed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("mission worker shutting down");
    task.stop().await;
    Ok(())
}

async fn roundtable_worker(config: FleetConfig) -> Result<()> {
    let store = Store::open(&config.store.path)?;
    let orchestrator = RoundtableOrchestrator::new(
        store.clone(),
        completion(&config),
        proposal_service(&store),
        Arc::new(VoiceCache::new(config.voice_cache_ttl())),
        config.roundtable_options(),
        rng(&config),
    );
    let worker = Arc::new(Mutex::new(RoundtableWorker::new(store, orchestrator)));
    info!("roundtable worker starting");

    let interval = Duration::from_secs(config.worker.roundtable_poll_interval_secs);
    let task = ScheduledTask::spawn("roundtable-worker", interval, move || {
        let worker = worker.clone();
        async move {
            if let Err(e) = worker.lock().await.poll_once().await {
                error!(error = %e, "roundtable worker poll failed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("roundtable worker shutting down");
    task.stop().await;
    Ok(())
}

fn heartbeat(config: FleetConfig) -> Result<()> {
    let store = Store::open(&config.store.path)?;
    let report = build_heartbeat(&config, &store).run();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn init(config: FleetConfig) -> Result<()> {
    let store = Store::open(&config.store.path)?;
    let policies = store.policies();

    let defaults = [
        ("x_daily_quota", json!({"limit": 8})),
        ("content_policy", json!({"max_drafts_per_day": 20})),
        (
            "deploy_policy",
            json!({"kill_switch": false, "cooldown_minutes": 60}),
        ),
        ("roundtable_policy", json!({"max_per_day": 6})),
        ("proposal_policy", json!({"max_per_agent_per_day": 10})),
        (
            "auto_approve",
            json!({"enabled": false, "allowed_step_kinds": []}),
        ),
        ("reaction_matrix", json!([])),
        ("conversation_schedule", json!([])),
    ];
    for (key, value) in defaults {
        if policies.get(key)?.is_none() {
            policies.upsert(key, &value, Some("seeded default"))?;
            info!(policy = key, "seeded");
        }
    }
    info!(path = %config.store.path.display(), "store initialized");
    Ok(())
}
