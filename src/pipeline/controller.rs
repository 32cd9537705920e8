//! Operational control surface over the batch aggregator
//!
//! Pause/resume are reported as booleans ("did a transition happen"),
//! never as errors.

use super::aggregator::{BatchAggregator, BatchOutcome, RunState};
use serde::Serialize;
use std::sync::Arc;

/// Read-only processor status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatus {
    /// Timer armed (running or paused)
    pub running: bool,
    pub paused: bool,
    pub interval_ms: u64,
    pub batch_size: usize,
}

#[derive(Clone)]
pub struct ProcessorController {
    aggregator: Arc<BatchAggregator>,
}

impl ProcessorController {
    pub fn new(aggregator: Arc<BatchAggregator>) -> Self {
        Self { aggregator }
    }

    /// `Running → Paused`. Ingestion is unaffected; ticks become no-ops.
    pub fn pause(&self) -> bool {
        let paused = self
            .aggregator
            .transition(RunState::Running, RunState::Paused);

        if paused {
            log::info!("⏸️  Queue processor paused ({} pending)", self.aggregator.queue().size());
        } else {
            log::debug!("Pause ignored (state: {:?})", self.aggregator.run_state());
        }
        paused
    }

    /// `Paused → Running`, then drain one batch immediately
    pub async fn resume(&self) -> bool {
        let pending = self.aggregator.queue().size();

        match self.aggregator.resume_and_drain().await {
            None => {
                log::debug!("Resume ignored (state: {:?})", self.aggregator.run_state());
                false
            }
            Some(outcome) => {
                log::info!("▶️  Queue processor resumed ({} pending)", pending);
                if let BatchOutcome::Busy = outcome {
                    log::debug!("Resume batch skipped, a tick is already draining");
                }
                true
            }
        }
    }

    pub fn status(&self) -> ProcessorStatus {
        let state = self.aggregator.run_state();
        let config = self.aggregator.config();

        ProcessorStatus {
            running: state != RunState::Stopped,
            paused: state == RunState::Paused,
            interval_ms: config.interval_ms,
            batch_size: config.max_batch_size,
        }
    }
}
