//! Play Runtime - proof-of-play aggregation service
//!
//! Wires the play pipeline together:
//! - Opens the configured stats backend (memory or SQLite)
//! - Starts the batch aggregator on its processing cadence
//! - Optionally tails a JSONL device log into the event queue
//! - Periodically writes the campaign report and logs processor status
//!
//! Usage:
//!   cargo run --release --bin play_runtime
//!
//! Environment variables:
//!   PLAYFLOW_PROCESS_INTERVAL_MS - Processing interval (default: 3000)
//!   PLAYFLOW_MAX_BATCH_SIZE - Events per batch (default: 10)
//!   PLAYFLOW_BACKEND - memory | sqlite (default: memory)
//!   PLAYFLOW_DB_PATH - SQLite database path (default: data/playflow.db)
//!   PLAYFLOW_EVENT_LOG - JSONL device log to tail (default: unset)
//!   PLAYFLOW_REPORT_PATH - Campaign report output (default: campaigns.json)

use dotenv::dotenv;
use log::{error, info, warn};
use playflow::pipeline::{
    BackendType, BatchAggregator, EventQueue, MemoryStatsBackend, ProcessorController,
    RuntimeConfig, SqliteStatsBackend, StatsBackend, StatsStore, tail_event_log,
};
use playflow::report::{report_task, ReportConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

const STATUS_LOG_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = RuntimeConfig::from_env()?;

    info!("🚀 Play Runtime");
    info!("   ├─ Backend: {:?}", config.backend);
    info!("   ├─ Process interval: {}ms", config.aggregator.interval_ms);
    info!("   ├─ Max batch size: {}", config.aggregator.max_batch_size);
    info!(
        "   ├─ Event log: {}",
        config.event_log_path.as_deref().unwrap_or("(none)")
    );
    info!(
        "   └─ Report: {} (every {}ms)",
        config.report_path, config.report_interval_ms
    );

    info!("🔧 Initializing stats backend...");
    let backend: Arc<dyn StatsBackend> = match config.backend {
        BackendType::Memory => Arc::new(MemoryStatsBackend::new()),
        BackendType::Sqlite => Arc::new(SqliteStatsBackend::open(
            &config.db_path,
            &config.schema_dir,
        )?),
    };

    let queue = Arc::new(EventQueue::new());
    let store = Arc::new(StatsStore::new(backend));
    let aggregator = Arc::new(BatchAggregator::new(
        queue.clone(),
        store.clone(),
        config.aggregator,
    ));
    let controller = ProcessorController::new(aggregator.clone());

    aggregator.start().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("🚀 Spawning background tasks...");

    let ingestion_handle = config.event_log_path.as_ref().map(|path| {
        let path = PathBuf::from(path);
        let queue = queue.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = tail_event_log(path, queue, shutdown).await {
                error!("❌ Event log ingestion failed: {}", e);
            }
        })
    });
    if ingestion_handle.is_some() {
        info!("   ├─ ✅ Event log ingestion task spawned");
    }

    let report_handle = tokio::spawn(report_task(
        store.clone(),
        ReportConfig {
            file_path: config.report_path.clone(),
            refresh_interval: Duration::from_millis(config.report_interval_ms),
        },
        shutdown_rx.clone(),
    ));
    info!("   └─ ✅ Report task spawned");

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let mut status_timer = interval(Duration::from_secs(STATUS_LOG_INTERVAL_SECS));
    status_timer.tick().await;

    loop {
        tokio::select! {
            _ = status_timer.tick() => {
                let status = controller.status();
                let metrics = aggregator.metrics();
                info!(
                    "📊 Processor: running={} paused={} | queue: {} | processed: {} failed: {} batches: {}",
                    status.running,
                    status.paused,
                    queue.size(),
                    metrics.processed,
                    metrics.failed,
                    metrics.batches
                );
            }
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                    Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
                }
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);

    if let Some(handle) = ingestion_handle {
        if let Err(e) = handle.await {
            warn!("Ingestion task ended abnormally: {}", e);
        }
    }

    aggregator.stop().await;

    if let Err(e) = report_handle.await {
        warn!("Report task ended abnormally: {}", e);
    }

    let metrics = aggregator.metrics();
    info!("✅ Play runtime stopped");
    info!("   ├─ Processed: {}", metrics.processed);
    info!("   ├─ Failed: {}", metrics.failed);
    info!("   └─ Left in queue: {}", queue.size());
    Ok(())
}
