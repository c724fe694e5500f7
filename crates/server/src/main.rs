//! Herald worker daemon and operator CLI.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use herald_common::{Config, QueueBackendKind};
use herald_db::repositories::FanoutReceiptRepository;
use herald_queue::{QueueMaintenance, SchedulerConfig, run_scheduler};
use sea_orm::DatabaseConnection;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod wiring;

/// How often idle rate-limit state is dropped.
const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Herald: notification fan-out and queue delivery for a federated server.
#[derive(Parser)]
#[command(name = "herald", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run queue workers until SIGINT or SIGTERM
    Run,

    /// Apply pending database migrations
    Migrate,

    /// Inspect or replay dead letters
    #[command(subcommand)]
    DeadLetters(DeadLetterCommands),

    /// Show queue depths and the dead-letter count
    Stats,
}

#[derive(Subcommand)]
enum DeadLetterCommands {
    /// List dead letters, newest first
    List {
        /// Only show this queue
        #[arg(long)]
        queue: Option<String>,

        /// Maximum entries to show
        #[arg(long, default_value = "50")]
        limit: u64,
    },

    /// Put a dead letter back on its queue
    Replay {
        /// Dead letter id
        id: String,
    },
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("herald=info"));
    let json = std::env::var("HERALD_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect(config: &Config) -> Result<Arc<DatabaseConnection>> {
    let db = herald_db::init(config).await?;
    info!("Connected to database");
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run => run(&config).await,
        Commands::Migrate => {
            let db = connect(&config).await?;
            info!("Running database migrations...");
            herald_db::migrate(&db).await?;
            info!("Migrations completed");
            Ok(())
        }
        Commands::DeadLetters(DeadLetterCommands::List { queue, limit }) => {
            let db = connect(&config).await?;
            let stack = wiring::stack(&config, &db).await?;
            let entries = stack.manager.dead_letters(queue.as_deref(), limit).await?;

            if entries.is_empty() {
                println!("No dead letters.");
            }
            for entry in entries {
                println!(
                    "{}  queue={}  attempts={}  failed_at={}",
                    entry.id,
                    entry.queue,
                    entry.attempts,
                    entry.failed_at.to_rfc3339()
                );
                println!("    error: {}", entry.last_error);
                println!("    payload: {}", entry.payload);
            }
            Ok(())
        }
        Commands::DeadLetters(DeadLetterCommands::Replay { id }) => {
            let db = connect(&config).await?;
            let stack = wiring::stack(&config, &db).await?;
            let job_id = stack.manager.replay_dead_letter(&id).await?;
            println!("Replayed {id} as job {job_id}");
            Ok(())
        }
        Commands::Stats => {
            let db = connect(&config).await?;
            let stack = wiring::stack(&config, &db).await?;

            println!("Backend: {}", stack.manager.backend_name());
            for (queue, depth) in stack.manager.depths().await? {
                match depth {
                    Some(depth) => println!("  {queue}: {depth} waiting"),
                    None => println!("  {queue}: depth not reported"),
                }
            }
            println!("Dead letters: {}", stack.manager.dead_letter_count().await?);
            Ok(())
        }
    }
}

async fn run(config: &Config) -> Result<()> {
    info!("Starting herald workers...");

    let db = connect(config).await?;
    herald_db::migrate(&db).await?;
    info!("Migrations completed");

    let stack = wiring::stack(config, &db).await?;
    if config.queue.backend == QueueBackendKind::InProcess {
        warn!("In-process backend runs jobs at enqueue time; workers will stay idle");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for worker in 0..config.queue.workers {
        let manager = stack.manager.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            manager.run_loop(shutdown).await;
            info!(worker, "Queue worker stopped");
        }));
    }
    info!(workers = config.queue.workers, "Queue workers started");

    let maintenance = Arc::new(QueueMaintenance::new(
        stack.manager.clone(),
        FanoutReceiptRepository::new(db.clone()),
    ));
    tasks.extend(run_scheduler(
        SchedulerConfig::from(config),
        maintenance,
        shutdown_rx.clone(),
    ));

    let limiter = stack.limiter.clone();
    let mut limiter_shutdown = shutdown_rx;
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => limiter.cleanup().await,
                _ = limiter_shutdown.changed() => break,
            }
        }
    }));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Worker task panicked");
        }
    }

    info!("Herald shutdown complete");
    Ok(())
}
