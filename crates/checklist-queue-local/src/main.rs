mod client;
mod config;
mod connectivity;
mod store;
mod summary;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use checklist_queue_core::{
    CaptureOutcome, KeyValueStore, NetworkError, Nota, OfflineQueue, Palete, QueueRecord, RecordKind,
    SubmissionClient, SyncStatus,
};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch as tokio_watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use client::HttpSubmissionClient;
use config::{Command, Config};
use connectivity::ProbeMonitor;
use store::FileStore;
use summary::DaySummary;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    let dir = config.effective_data_dir();
    info!("Starting checklist-queue");
    info!("  API base: {}", config.api_base);
    info!("  Data dir: {}", dir.display());
    info!("  Drain policy: {}", config.drain_policy);

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&dir));
    let http = Arc::new(HttpSubmissionClient::new(
        config.api_base.clone(),
        config.submit_timeout(),
    ));
    let client: Arc<dyn SubmissionClient> = http.clone();
    let queue = Arc::new(OfflineQueue::new(store, client, config.queue_options()));

    match config.command.clone() {
        Command::Enqueue { kind, file } => {
            let record = read_record(kind.into(), file.as_deref())?;
            let description = record.describe();
            let length = queue
                .try_enqueue(record)
                .await
                .with_context(|| format!("failed to enqueue {}", description))?;
            println!("{} queued ({} pending)", description, length);
        }
        Command::Capture { kind, file } => {
            let record = read_record(kind.into(), file.as_deref())?;
            let description = record.describe();
            let monitor = probe_monitor(&config)?;
            queue.refresh_online(&monitor).await;

            match queue.capture(record).await {
                CaptureOutcome::Submitted(server) => {
                    println!("{}", serde_json::to_string_pretty(&server)?);
                }
                CaptureOutcome::Enqueued => {
                    println!("{} saved offline, it will be sent when the network returns", description);
                }
                CaptureOutcome::Rejected(e @ NetworkError::Conflict(_)) => {
                    anyhow::bail!("{} already exists: {}", description, e);
                }
                CaptureOutcome::Rejected(e) => {
                    anyhow::bail!("{} rejected: {}", description, e);
                }
            }
        }
        Command::Pending { kind } => {
            let records = queue.try_list_pending(kind.into()).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Count => {
            let count = queue.try_count().await?;
            println!("{}", serde_json::to_string(&count)?);
        }
        Command::Status => {
            let monitor = probe_monitor(&config)?;
            queue.refresh_online(&monitor).await;
            let view = SyncStatus::new(Arc::clone(&queue)).snapshot().await;
            println!("{}", view.label);
            println!("  online:  {}", view.state.is_online);
            println!("  syncing: {}", view.state.is_syncing);
            println!(
                "  pending: {} nota(s), {} palete(s)",
                view.count.notas, view.count.paletes
            );
            if view.can_force_sync {
                println!("  run `checklist-queue sync` to send them now");
            }
        }
        Command::Sync => {
            let monitor = probe_monitor(&config)?;
            if !queue.refresh_online(&monitor).await {
                anyhow::bail!("API host is unreachable, nothing was sent");
            }
            match queue.force_sync().await {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => warn!("A sync is already running"),
            }
        }
        Command::Run => run(&config, queue).await?,
        Command::Summary { day, rota } => {
            let day = day.unwrap_or_else(|| chrono::Local::now().date_naive());
            let (notas, paletes) = futures::try_join!(
                http.list_notas(day, rota),
                http.list_paletes(day, rota),
            )
            .context("failed to load the day's records")?;
            let summary = DaySummary::build(day, rota, &notas, &paletes, queue.count().await);
            println!("{}", summary);
        }
    }

    Ok(())
}

/// Keep the queue attached to the network until Ctrl+C or SIGTERM.
async fn run(config: &Config, queue: Arc<OfflineQueue>) -> anyhow::Result<()> {
    let monitor = probe_monitor(config)?;
    monitor.start();
    let listener = queue.attach(&monitor);

    let mut state_rx = queue.subscribe_state();
    let status = SyncStatus::new(Arc::clone(&queue));
    let logger = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let view = status.snapshot().await;
            info!("Status: {}", view.label);
        }
    });

    let mut shutdown_rx = create_shutdown_signal();
    let _ = shutdown_rx.wait_for(|&v| v).await;

    listener.shutdown().await;
    monitor.stop();
    logger.abort();

    let remaining = queue.count().await;
    info!("Shutdown complete, {} record(s) still pending", remaining.total);
    Ok(())
}

fn probe_monitor(config: &Config) -> anyhow::Result<ProbeMonitor> {
    Ok(ProbeMonitor::new(
        config.effective_probe_target()?,
        config.probe_interval(),
        config.probe_timeout(),
    ))
}

/// Read one record of `kind` as JSON from `file`, or stdin when absent.
fn read_record(kind: RecordKind, file: Option<&Path>) -> anyhow::Result<QueueRecord> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };

    let record = match kind {
        RecordKind::Notas => QueueRecord::Nota(
            serde_json::from_str::<Nota>(&text).context("invalid nota JSON")?,
        ),
        RecordKind::Paletes => QueueRecord::Palete(
            serde_json::from_str::<Palete>(&text).context("invalid palete JSON")?,
        ),
    };
    Ok(record)
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> tokio_watch::Receiver<bool> {
    let (tx, rx) = tokio_watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
                Err(e) => {
                    warn!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating shutdown");
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
