//! payops CLI: run the router against simulated traffic or inspect saved state.

use payops::config::Config;
use payops::router::{spawn_router_loop, Router, RouterEvent};
use payops::store::PayopsStore;
use payops::student::OnlineLearner;
use payops::{build_council, TransactionSimulator};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "payops", version, about = "Student/teacher routing for payment failures")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "PAYOPS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Route simulated transactions through the student and council
    Run(RunArgs),
    /// Print stats for the latest persisted student snapshot
    Stats,
}

#[derive(Args)]
struct RunArgs {
    /// Number of transactions to generate; runs until ctrl-c when omitted
    #[arg(short = 'n', long)]
    transactions: Option<usize>,

    /// Delay between transactions, overriding the config
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Bank to degrade
    #[arg(long)]
    chaos_bank: Option<String>,

    /// Failure rate for the chaos bank
    #[arg(long, default_value_t = 0.8)]
    chaos_rate: f64,

    /// Use the offline mock council
    #[arg(long)]
    mock: bool,

    /// Seed the simulator and mock council
    #[arg(long)]
    seed: Option<u64>,

    /// Start from an untrained student even if a snapshot exists
    #[arg(long)]
    fresh: bool,

    /// Do not persist anything
    #[arg(long)]
    no_store: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = Config::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Command::Run(args) => {
            if args.mock {
                config.council.use_mock = true;
            }
            if let Some(seed) = args.seed {
                config.simulator.seed = Some(seed);
                config.council.mock_seed = Some(seed);
            }
            if let Some(interval_ms) = args.interval_ms {
                config.simulator.interval_ms = interval_ms;
            }
            if args.no_store {
                config.store.enabled = false;
            }
            run(config, args).await
        }
        Command::Stats => stats(config).await,
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "payops=debug" } else { "payops=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

async fn run(config: Config, args: RunArgs) -> anyhow::Result<()> {
    let store = if config.store.enabled {
        Some(
            PayopsStore::connect(&config.store.path)
                .await
                .with_context(|| format!("failed to open {}", config.store.path.display()))?,
        )
    } else {
        None
    };

    let learner = restore_learner(&config, store.as_deref(), args.fresh).await;
    let council = build_council(&config.council);
    let mut router = Router::new(
        config.router.clone(),
        learner,
        council,
        Duration::from_secs(config.council.deliberation_timeout_secs),
    );
    if let Some(store) = store {
        router = router.with_store(store);
    }

    let mut simulator = TransactionSimulator::new(&config.simulator);
    let (handle, router_task) = spawn_router_loop(router);
    let reporter = tokio::spawn(report_events(handle.subscribe()));

    if let Some(bank) = args.chaos_bank {
        simulator.inject_chaos(bank.clone(), args.chaos_rate)?;
        handle.set_chaos(Some(bank)).await?;
    }

    let interval = Duration::from_millis(config.simulator.interval_ms);
    let mut submitted = 0usize;
    loop {
        if args.transactions.is_some_and(|limit| submitted >= limit) {
            break;
        }
        let transaction = simulator.generate_transaction();
        handle.submit(transaction).await?;
        submitted += 1;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        }
    }

    let status = handle.status().await?;
    drop(handle);
    let router = router_task.await.context("router task panicked")?;
    drop(router);
    reporter.await.context("event reporter panicked")?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn restore_learner(config: &Config, store: Option<&PayopsStore>, fresh: bool) -> OnlineLearner {
    let mut learner = OnlineLearner::new(config.student.clone());
    let Some(store) = store.filter(|_| !fresh) else {
        return learner;
    };

    match store.load_latest_snapshot().await {
        Ok(Some(stored)) => {
            tracing::info!(
                snapshot_id = stored.id,
                samples_seen = stored.samples_seen,
                saved_at = %stored.created_at,
                "restored student snapshot"
            );
            learner.restore(stored.snapshot);
        }
        Ok(None) => tracing::info!("no student snapshot found, starting untrained"),
        Err(error) => tracing::warn!(%error, "failed to restore student snapshot, starting untrained"),
    }
    learner
}

async fn report_events(mut events: broadcast::Receiver<RouterEvent>) {
    loop {
        match events.recv().await {
            Ok(RouterEvent::Decision {
                decision,
                transaction_id,
            }) => {
                tracing::info!(
                    source = %decision.agent_source,
                    action = %decision.action,
                    confidence = decision.confidence_score,
                    %transaction_id,
                    "{}",
                    decision.reasoning
                );
            }
            Ok(RouterEvent::CouncilDebate(debate)) => {
                tracing::info!(
                    risk = %debate.risk_argument.suggested_action,
                    growth = %debate.growth_argument.suggested_action,
                    duration_ms = debate.debate_duration_ms,
                    "council debate: {}",
                    debate.manager_synthesis
                );
            }
            Ok(RouterEvent::Transaction(_) | RouterEvent::Metrics(_)) => {}
            Err(broadcast::error::RecvError::Lagged(count)) => {
                tracing::warn!(count, "event reporter lagged behind router");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn stats(config: Config) -> anyhow::Result<()> {
    let store: Arc<PayopsStore> = PayopsStore::connect(&config.store.path)
        .await
        .with_context(|| format!("failed to open {}", config.store.path.display()))?;

    let Some(stored) = store.load_latest_snapshot().await? else {
        println!("no student snapshot in {}", config.store.path.display());
        return Ok(());
    };

    let learner = OnlineLearner::from_snapshot(config.student.clone(), stored.snapshot);
    let report = serde_json::json!({
        "snapshot_id": stored.id,
        "saved_at": stored.created_at,
        "student": learner.get_stats(),
        "decisions": store.decision_counts().await?,
        "success_rate": store.latest_metric("success_rate").await?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
