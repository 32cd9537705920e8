//! # Play Pipeline
//!
//! Decouples fast synchronous ingestion from slower, controllable aggregation.
//!
//! ```text
//! device ──▶ EventQueue::enqueue ──▶ BatchAggregator (timer, bounded batches)
//!                                          │
//!                                          ▼
//!                                    StatsStore ──▶ snapshot() / CampaignReport
//!                                          │
//!                                    StatsBackend (memory | sqlite)
//! ```
//!
//! - Ingestion never blocks on aggregation; the queue is unbounded
//! - Each tick drains at most `max_batch_size` events (backpressure by cadence)
//! - A failing event is logged and dropped, never stalls the pipeline
//! - `ProcessorController` pauses/resumes processing, not ingestion
//!
//! ## Module Organization
//!
//! - `types` - events, records, snapshot
//! - `error` - validation/apply/store errors
//! - `queue` - FIFO event buffer
//! - `store` - stats store + backend trait
//! - `memory` / `db` - in-memory and SQLite backends
//! - `aggregator` - timer-driven batch processor
//! - `controller` - pause/resume/status surface
//! - `config` - environment configuration
//! - `ingestion` / `tail` - JSONL device-log source

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod memory;
pub mod queue;
pub mod store;
pub mod tail;
pub mod types;

// Re-export commonly used types
pub use aggregator::{AggregatorMetrics, BatchAggregator, BatchOutcome, BatchReport, RunState};
pub use config::{AggregatorConfig, BackendType, ConfigError, RuntimeConfig};
pub use controller::{ProcessorController, ProcessorStatus};
pub use db::{run_schema_migrations, SqliteStatsBackend};
pub use error::{ApplyError, IngestError, StoreError, ValidationError};
pub use ingestion::{ingest_json_line, tail_event_log, IngestStats};
pub use memory::MemoryStatsBackend;
pub use queue::EventQueue;
pub use store::{StatsBackend, StatsStore};
pub use tail::TailReader;
pub use types::{
    CampaignDelta, CampaignRecord, PlayEvent, QueuedEvent, ScreenDelta, ScreenRecord,
    StatsSnapshot,
};
