//! periodiq command line
//!
//! `run` starts settlement workers against a local RocksDB directory, `period`
//! prints the current period of a room, `settle` retries one stuck period and
//! `verify` checks a resolved period's VRF proof.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use periodiq::{
    broadcast::{BroadcastMessage, Topic},
    clock::{self, PeriodKey},
    config::EngineConfig,
    errors::{ConfigurationError, EngineResult, StorageError},
    factory::EngineFactory,
    games::GameKind,
    ledger::InMemoryLedger,
    period_store::PeriodStore,
    selector::verify_selection,
    storage::OptimizedStorage,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Period-based result engine
#[derive(Parser)]
#[command(name = "periodiq")]
#[command(about = "Period-based result engine with verifiable draws")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the config file
    #[arg(short, long)]
    data_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run settlement workers until Ctrl-C
    Run {
        /// Worker tasks; defaults to settlement.workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Print the current period of a room
    Period {
        #[arg(short, long)]
        game: GameKind,

        #[arg(short, long)]
        duration: u32,

        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Retry settlement of one period, e.g. `wingo:60:2026101700042`
    Settle { period: PeriodKey },

    /// Verify the stored result of a resolved period
    Verify { period: PeriodKey },
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_directory = dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.clone().into()),
        )
        .init();

    match cli.command {
        Commands::Run { workers } => run(config, workers).await,
        Commands::Period { game, duration, at } => print_period(&config, game, duration, at),
        Commands::Settle { period } => settle_one(config, period).await,
        Commands::Verify { period } => verify(&config, period),
    }
}

async fn run(config: EngineConfig, workers: Option<usize>) -> EngineResult<()> {
    let count = workers.unwrap_or(config.settlement.workers).max(1);
    warn!("Using the in-memory ledger; balances are not persisted");
    let engine = EngineFactory::create_in_memory(config, Arc::new(InMemoryLedger::new()))?;

    let mut results = engine.notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match results.recv().await {
                Ok(envelope) => {
                    if let (Topic::AdminMonitor, BroadcastMessage::PeriodResult { period, outcome, source, .. }) =
                        (envelope.topic, envelope.message)
                    {
                        info!(%period, %outcome, ?source, "🎲 Period result");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "result log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut handles = Vec::with_capacity(count);
    let mut running = Vec::with_capacity(count);
    for i in 0..count {
        let worker = Arc::new(engine.worker(format!("worker-{}", i)).with_countdown(i == 0));
        handles.push(worker.clone().spawn());
        running.push(worker);
    }
    info!(workers = count, "✅ periodiq running; Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "signal handler failed; shutting down");
    }
    for worker in &running {
        worker.stop();
    }
    for handle in handles {
        let _ = handle.await;
    }
    info!("Final metrics:\n{}", engine.metrics.to_prometheus_format());
    Ok(())
}

fn print_period(
    config: &EngineConfig,
    game: GameKind,
    duration: u32,
    at: Option<DateTime<Utc>>,
) -> EngineResult<()> {
    let game_config = config.game(game).ok_or_else(|| {
        ConfigurationError::ValidationFailed(format!("game {} is not configured", game))
    })?;
    let info = clock::current_period(game_config, duration, at.unwrap_or_else(Utc::now))?;
    let json = serde_json::to_string_pretty(&info)
        .map_err(|e| ConfigurationError::ValidationFailed(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

async fn settle_one(config: EngineConfig, period: PeriodKey) -> EngineResult<()> {
    warn!("Using the in-memory ledger; payouts from this run are not persisted");
    let engine = EngineFactory::create_in_memory(config, Arc::new(InMemoryLedger::new()))?;
    let outcome = engine.coordinator("cli").settle(period, Utc::now()).await?;
    println!("{:?}", outcome);
    Ok(())
}

fn verify(config: &EngineConfig, period: PeriodKey) -> EngineResult<()> {
    let store = PeriodStore::new(OptimizedStorage::new(&config.storage.data_directory)?);
    let row = store
        .load_period(&period)?
        .ok_or_else(|| StorageError::ReadFailed(format!("no row for period {}", period)))?;
    let Some(resolution) = row.resolution else {
        println!("{} is not resolved", period);
        return Ok(());
    };

    match &resolution.vrf {
        Some(bundle) => {
            let valid = verify_selection(period, &resolution.outcome, bundle)
                .map_err(StorageError::CorruptedData)?;
            println!(
                "{} outcome {} public key {} proof {}",
                period,
                resolution.outcome,
                bundle.public_key,
                if valid { "VALID" } else { "INVALID" }
            );
        }
        None => println!(
            "{} outcome {} was set by override ({:?})",
            period, resolution.outcome, resolution.source
        ),
    }
    Ok(())
}
