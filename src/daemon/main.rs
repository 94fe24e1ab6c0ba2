/**
 * campo-syncd Entry Point
 *
 * Runs the sync queue as a standalone process: a foreground loop plus a
 * background context on the same database, with a reachability probe
 * standing in for platform connectivity events. Also offers one-shot
 * commands to enqueue, sync and inspect the queue.
 */
use std::path::PathBuf;
use std::time::Duration;

use campo_sync::local_db::LocalDatabase;
use campo_sync::offline::{ApiClient, EnqueueRequest, OperationQueue, PassOutcome, Reconciler};
use campo_sync::shared::{Method, Payload, SyncConfig};
use campo_sync::sync::network_monitor::NetworkMonitor;
use campo_sync::sync::{BackgroundSync, SyncService};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "campo-syncd", version, about = "Offline-first sync queue daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file; environment variables are used when absent
    #[arg(long, global = true, env = "SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync loop until interrupted
    Run {
        /// Seconds between reachability probes
        #[arg(long, default_value_t = 30)]
        probe_interval_secs: u64,

        /// Do not start a background context
        #[arg(long)]
        no_background: bool,
    },

    /// Queue one write intent
    Enqueue {
        /// Semantic tag, e.g. CREATE_DENUNCIA
        #[arg(long)]
        kind: String,

        /// Path relative to the API base, or an absolute URL
        #[arg(long)]
        target: String,

        #[arg(long, default_value = "POST")]
        method: Method,

        /// Idempotency key, supplied by the caller
        #[arg(long)]
        key: String,

        /// Explicit record id
        #[arg(long)]
        id: Option<String>,

        /// JSON body
        #[arg(long)]
        json: Option<String>,

        /// Extra header as NAME=VALUE, repeatable
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },

    /// Run a single reconciliation pass and print the report
    Sync,

    /// Print pending and dead-lettered events as JSON lines
    Status,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => SyncConfig::from_toml_file(path)?,
        None => SyncConfig::from_env()?,
    };
    tracing::debug!(api = %config.api_base_url, db = %config.database_path.display(), "configuration loaded");

    match cli.command {
        Commands::Run {
            probe_interval_secs,
            no_background,
        } => run(config, Duration::from_secs(probe_interval_secs.max(1)), !no_background).await?,
        Commands::Enqueue {
            kind,
            target,
            method,
            key,
            id,
            json,
            headers,
        } => {
            let db = LocalDatabase::open(&config.database_path).await?;
            let queue = OperationQueue::new(db);

            let mut request = EnqueueRequest::new(kind, target, method, key);
            if let Some(id) = id {
                request = request.with_id(id);
            }
            if let Some(json) = json {
                let value: serde_json::Value = serde_json::from_str(&json)?;
                request = request.with_payload(Payload::json(&value)?);
            }
            for (name, value) in headers {
                request = request.with_header(name, value);
            }

            let event = queue.enqueue(request).await?;
            println!("{}", event.id);
        }
        Commands::Sync => {
            let db = LocalDatabase::open(&config.database_path).await?;
            let reconciler = Reconciler::new(db, ApiClient::new(&config)?)
                .with_max_attempts(config.max_attempts)
                .with_context("cli");

            match reconciler.reconcile_once().await? {
                PassOutcome::Completed(report) => println!(
                    "{}",
                    serde_json::json!({
                        "attempted": report.attempted,
                        "synced": report.synced(),
                        "already_applied": report.already_applied,
                        "failed": report.failed,
                        "dead_lettered": report.dead_lettered,
                        "corrupt": report.corrupt,
                    })
                ),
                PassOutcome::Skipped => println!("{}", serde_json::json!({ "skipped": true })),
            }
        }
        Commands::Status => {
            let db = LocalDatabase::open(&config.database_path).await?;
            let pending = db.scan_pending().await?;
            let dead = db.scan_dead_letters().await?;

            for event in &pending.records {
                println!(
                    "{}",
                    serde_json::json!({
                        "state": "pending",
                        "id": event.id,
                        "kind": event.kind,
                        "method": event.method,
                        "target": event.target,
                        "attempts": event.attempts,
                        "last_error": event.last_error,
                        "enqueued_at": event.enqueued_at,
                    })
                );
            }
            for letter in &dead.records {
                println!(
                    "{}",
                    serde_json::json!({
                        "state": "dead_letter",
                        "id": letter.event.id,
                        "kind": letter.event.kind,
                        "attempts": letter.event.attempts,
                        "last_error": letter.event.last_error,
                        "evicted_at": letter.evicted_at,
                    })
                );
            }
            for (table, corrupt) in [("events", &pending.corrupt), ("dead_letters", &dead.corrupt)] {
                for record in corrupt {
                    println!(
                        "{}",
                        serde_json::json!({
                            "state": "corrupt",
                            "table": table,
                            "id": record.id,
                            "reason": record.reason,
                        })
                    );
                }
            }

            let stats = db.get_stats().await?;
            println!(
                "{}",
                serde_json::json!({
                    "state": "summary",
                    "pending": stats.pending_events,
                    "failing": stats.failing_events,
                    "dead_letters": stats.dead_letters,
                    "corrupt": pending.corrupt.len() + dead.corrupt.len(),
                    "max_attempts": stats.max_attempts,
                })
            );
        }
    }

    Ok(())
}

async fn run(config: SyncConfig, probe_interval: Duration, with_background: bool) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = NetworkMonitor::default();
    let probe_cancel = CancellationToken::new();
    let probe = monitor.spawn_probe(
        config.api_base_url.clone(),
        probe_interval,
        config.request_timeout,
        probe_cancel.clone(),
    );

    let background = if with_background {
        Some(BackgroundSync::spawn(&config, monitor.clone()).await?)
    } else {
        None
    };

    let mut service = SyncService::new(config, monitor).await?;
    if let Some(background) = &background {
        service.attach_background(background.messenger());
    }
    service.start().await;

    tracing::info!("campo-syncd running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    service.shutdown().await;
    if let Some(background) = background {
        background.shutdown().await;
    }
    probe_cancel.cancel();
    probe.await?;

    let status = service.status().await;
    tracing::info!(pending = status.pending_events, passes = status.passes, "stopped");
    Ok(())
}
