//! Batch aggregator - timer-driven drain of the event queue into the stats store
//!
//! ## State machine
//!
//! ```text
//!            start()              pause()
//! Stopped ───────────▶ Running ◀─────────▶ Paused
//!    ▲                    │       resume()     │
//!    └────────────────────┴──── stop() ────────┘
//! ```
//!
//! - `start()` runs one batch right away, then arms the periodic timer
//! - each tick while `Running` drains at most `max_batch_size` events
//! - ticks while `Paused` are no-ops; ingestion keeps filling the queue
//! - `stop()` disarms the timer and waits for any in-flight tick to finish
//!
//! ## Single-flight
//!
//! At most one batch runs at a time. A batch requested while another is in
//! progress (timer tick racing a resume, for example) is dropped and
//! reported as `BatchOutcome::Busy`, never queued.
//!
//! ## Failure isolation
//!
//! Every event is applied independently. An apply failure is logged and the
//! event is dropped (no retry, no requeue); the rest of the batch and the
//! timer carry on.

use super::config::AggregatorConfig;
use super::error::StoreError;
use super::queue::EventQueue;
use super::store::StatsStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// Result of one completed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Events folded into the store
    pub processed: usize,

    /// Events dropped because their apply failed
    pub failed: usize,

    /// Queue size after the batch
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Another batch was already running; this request was dropped
    Busy,

    /// Queue was empty, nothing to do
    Empty,

    Completed(BatchReport),
}

/// Lifetime counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorMetrics {
    pub batches: u64,
    pub processed: u64,
    pub failed: u64,
}

/// Armed periodic timer: dropping `shutdown` (or sending on it) ends the task
struct TimerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Clears the in-flight flag when the batch ends, however it ends
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the event queue into the stats store on a fixed cadence
///
/// Owns the only write path into the `StatsStore`. Construct once at
/// service start, share as `Arc<BatchAggregator>`.
pub struct BatchAggregator {
    queue: Arc<EventQueue>,
    store: Arc<StatsStore>,
    config: AggregatorConfig,

    /// Never held across an `.await`
    state: Mutex<RunState>,
    timer: Mutex<Option<TimerHandle>>,

    /// Serializes start/stop so a timer is never armed after a concurrent stop
    lifecycle: tokio::sync::Mutex<()>,

    in_flight: AtomicBool,

    batches: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl BatchAggregator {
    pub fn new(queue: Arc<EventQueue>, store: Arc<StatsStore>, config: AggregatorConfig) -> Self {
        Self {
            queue,
            store,
            config,
            state: Mutex::new(RunState::Stopped),
            timer: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            in_flight: AtomicBool::new(false),
            batches: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<StatsStore> {
        &self.store
    }

    pub fn config(&self) -> AggregatorConfig {
        self.config
    }

    pub fn run_state(&self) -> RunState {
        *self.lock_state()
    }

    pub fn metrics(&self) -> AggregatorMetrics {
        AggregatorMetrics {
            batches: self.batches.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// `Stopped → Running`: drain one batch now, then arm the timer
    ///
    /// Returns false if the processor was already started (running or paused).
    pub async fn start(self: &Arc<Self>) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        if !self.transition(RunState::Stopped, RunState::Running) {
            log::info!("⚠️  Queue processor already running");
            return false;
        }

        // Drain on start so the first events after a cold start don't wait a full period
        self.run_batch().await;

        let period = Duration::from_millis(self.config.interval_ms);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_timer(Arc::downgrade(self), period, shutdown_rx));
        *self.lock_timer() = Some(TimerHandle { shutdown, task });

        log::info!(
            "🚀 Queue processor started (interval: {}ms, batch size: {})",
            self.config.interval_ms,
            self.config.max_batch_size
        );
        true
    }

    /// Any state → `Stopped`: disarm the timer
    ///
    /// An in-flight batch is allowed to finish before this returns.
    /// Returns false if already stopped.
    pub async fn stop(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.lock_state();
            if *state == RunState::Stopped {
                return false;
            }
            *state = RunState::Stopped;
        }

        let timer = self.lock_timer().take();
        if let Some(timer) = timer {
            let _ = timer.shutdown.send(());
            if let Err(e) = timer.task.await {
                log::warn!("⚠️  Timer task ended abnormally: {}", e);
            }
        }

        log::info!("🛑 Queue processor stopped");
        true
    }

    /// `Paused → Running`, then drain one batch right away
    ///
    /// Holds the lifecycle lock across the batch, so a concurrent `stop()`
    /// returns only after it. `None` if the processor was not paused.
    pub(crate) async fn resume_and_drain(&self) -> Option<BatchOutcome> {
        let _lifecycle = self.lifecycle.lock().await;

        if !self.transition(RunState::Paused, RunState::Running) {
            return None;
        }
        Some(self.run_batch().await)
    }

    /// Run one batch now, regardless of run state
    ///
    /// `batch size = min(max_batch_size, queue size)`. Dropped as `Busy` if
    /// another batch is in progress.
    pub async fn run_batch(&self) -> BatchOutcome {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            log::debug!("Batch already in progress, dropping request");
            return BatchOutcome::Busy;
        };

        let pending = self.queue.size();
        if pending == 0 {
            return BatchOutcome::Empty;
        }

        let batch_size = self.config.max_batch_size.min(pending);
        let batch_start = std::time::Instant::now();

        log::info!("⚙️  Processing queue ({} events pending)...", pending);

        let mut report = BatchReport::default();

        for _ in 0..batch_size {
            let Some(event) = self.queue.dequeue() else {
                break;
            };

            match self.store.apply_event(&event).await {
                Ok(()) => {
                    report.processed += 1;
                    log::debug!(
                        "Processed: {} on {} at {}",
                        event.campaign_id(),
                        event.screen_id(),
                        event.timestamp()
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    log::error!("❌ Error processing event, dropping it: {}", e);
                }
            }
        }

        report.remaining = self.queue.size();

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.processed
            .fetch_add(report.processed as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);

        log::info!(
            "✅ Batch complete: {} processed, {} failed | pending: {} | {}ms",
            report.processed,
            report.failed,
            report.remaining,
            batch_start.elapsed().as_millis()
        );

        BatchOutcome::Completed(report)
    }

    /// Drop all pending events and all aggregated records
    ///
    /// Returns how many queued events were discarded. A batch already in
    /// flight may still land events it dequeued before the reset.
    pub async fn reset(&self) -> Result<usize, StoreError> {
        let dropped = self.queue.clear();
        self.store.reset().await?;
        log::info!("🧹 Stats reset ({} pending events dropped)", dropped);
        Ok(dropped)
    }

    /// Compare-and-set on the run state
    pub(crate) fn transition(&self, from: RunState, to: RunState) -> bool {
        let mut state = self.lock_state();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    async fn on_tick(&self) {
        match self.run_state() {
            RunState::Running => {
                self.run_batch().await;
            }
            RunState::Paused => {
                log::trace!("Processor paused, skipping tick ({} pending)", self.queue.size());
            }
            RunState::Stopped => {}
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<TimerHandle>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Periodic tick loop
///
/// First tick fires one full period after arming (start already drained).
/// Shutdown is only observed between ticks, so a running batch is never cut
/// short.
async fn run_timer(
    aggregator: Weak<BatchAggregator>,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            // Sent by stop(), or sender dropped with the aggregator
            _ = &mut shutdown => break,
        }

        let Some(aggregator) = aggregator.upgrade() else {
            break;
        };
        aggregator.on_tick().await;
    }

    log::debug!("Aggregator timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::StoreError;
    use crate::pipeline::memory::MemoryStatsBackend;
    use crate::pipeline::store::StatsBackend;
    use crate::pipeline::types::{
        CampaignDelta, CampaignRecord, PlayEvent, QueuedEvent, ScreenDelta, ScreenRecord,
    };
    use async_trait::async_trait;

    /// Memory backend that refuses one campaign and can be slowed down
    struct ScriptedBackend {
        inner: MemoryStatsBackend,
        rejected_campaign: &'static str,
        apply_delay: Duration,
    }

    impl ScriptedBackend {
        fn new(rejected_campaign: &'static str, apply_delay: Duration) -> Self {
            Self {
                inner: MemoryStatsBackend::new(),
                rejected_campaign,
                apply_delay,
            }
        }
    }

    #[async_trait]
    impl StatsBackend for ScriptedBackend {
        async fn upsert_campaign(
            &self,
            campaign_id: &str,
            delta: &CampaignDelta,
        ) -> Result<(), StoreError> {
            self.inner.upsert_campaign(campaign_id, delta).await
        }

        async fn upsert_screen(
            &self,
            screen_id: &str,
            delta: &ScreenDelta,
        ) -> Result<(), StoreError> {
            self.inner.upsert_screen(screen_id, delta).await
        }

        async fn list_campaigns(&self) -> Result<Vec<CampaignRecord>, StoreError> {
            self.inner.list_campaigns().await
        }

        async fn list_screens(&self) -> Result<Vec<ScreenRecord>, StoreError> {
            self.inner.list_screens().await
        }

        async fn find_campaign(
            &self,
            campaign_id: &str,
        ) -> Result<Option<CampaignRecord>, StoreError> {
            self.inner.find_campaign(campaign_id).await
        }

        async fn find_screen(&self, screen_id: &str) -> Result<Option<ScreenRecord>, StoreError> {
            self.inner.find_screen(screen_id).await
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear().await
        }

        async fn apply_event(&self, event: &QueuedEvent) -> Result<(), StoreError> {
            if !self.apply_delay.is_zero() {
                tokio::time::sleep(self.apply_delay).await;
            }
            if event.campaign_id() == self.rejected_campaign {
                return Err(StoreError::Backend("write rejected".to_string()));
            }
            self.inner.apply_event(event).await
        }

        fn backend_type(&self) -> &'static str {
            "scripted"
        }
    }

    fn make_aggregator(max_batch_size: usize) -> Arc<BatchAggregator> {
        Arc::new(BatchAggregator::new(
            Arc::new(EventQueue::new()),
            Arc::new(StatsStore::in_memory()),
            AggregatorConfig::new(60_000, max_batch_size).unwrap(),
        ))
    }

    fn fill(queue: &EventQueue, count: usize) {
        for i in 0..count {
            queue
                .enqueue(PlayEvent::new(format!("s{}", i % 3), "c1", format!("T{}", i)))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_batch_is_bounded_by_max_batch_size() {
        let aggregator = make_aggregator(10);
        fill(aggregator.queue(), 25);

        let outcome = aggregator.run_batch().await;

        assert_eq!(
            outcome,
            BatchOutcome::Completed(BatchReport {
                processed: 10,
                failed: 0,
                remaining: 15,
            })
        );
        let campaign = aggregator.store().campaign("c1").await.unwrap().unwrap();
        assert_eq!(campaign.play_count, 10);
    }

    #[tokio::test]
    async fn test_small_backlog_drains_completely() {
        let aggregator = make_aggregator(10);
        fill(aggregator.queue(), 4);

        let outcome = aggregator.run_batch().await;

        assert!(matches!(
            outcome,
            BatchOutcome::Completed(BatchReport { processed: 4, remaining: 0, .. })
        ));
        assert_eq!(aggregator.run_batch().await, BatchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_failed_event_does_not_abort_batch() {
        let store = Arc::new(StatsStore::new(Arc::new(ScriptedBackend::new(
            "bad",
            Duration::ZERO,
        ))));
        let aggregator = BatchAggregator::new(
            Arc::new(EventQueue::new()),
            store.clone(),
            AggregatorConfig::default(),
        );

        for (i, campaign) in ["c1", "c2", "bad", "c4", "c5"].iter().enumerate() {
            aggregator
                .queue()
                .enqueue(PlayEvent::new(format!("s{}", i + 1), *campaign, "T"))
                .unwrap();
        }

        let outcome = aggregator.run_batch().await;

        assert_eq!(
            outcome,
            BatchOutcome::Completed(BatchReport {
                processed: 4,
                failed: 1,
                remaining: 0,
            })
        );
        for campaign in ["c1", "c2", "c4", "c5"] {
            assert!(store.campaign(campaign).await.unwrap().is_some());
        }
        assert!(store.campaign("bad").await.unwrap().is_none());
        // Dropped, not requeued
        assert!(aggregator.queue().is_empty());
        assert_eq!(
            aggregator.metrics(),
            AggregatorMetrics {
                batches: 1,
                processed: 4,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_overlapping_batch_is_dropped() {
        let aggregator = make_aggregator(10);
        fill(aggregator.queue(), 5);

        let _held = FlightGuard::acquire(&aggregator.in_flight).unwrap();
        assert_eq!(aggregator.run_batch().await, BatchOutcome::Busy);
        assert_eq!(aggregator.queue().size(), 5);
    }

    #[tokio::test]
    async fn test_start_drains_immediately_and_reports_second_start() {
        let aggregator = make_aggregator(10);
        fill(aggregator.queue(), 3);

        assert!(aggregator.start().await);
        assert_eq!(aggregator.queue().size(), 0);
        assert_eq!(aggregator.run_state(), RunState::Running);

        assert!(!aggregator.start().await);

        assert!(aggregator.stop().await);
        assert!(!aggregator.stop().await);
        assert_eq!(aggregator.run_state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn test_timer_ticks_drain_backlog() {
        let aggregator = Arc::new(BatchAggregator::new(
            Arc::new(EventQueue::new()),
            Arc::new(StatsStore::in_memory()),
            AggregatorConfig::new(20, 5).unwrap(),
        ));

        assert!(aggregator.start().await);
        fill(aggregator.queue(), 12);

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(aggregator.queue().size(), 0);
        let campaign = aggregator.store().campaign("c1").await.unwrap().unwrap();
        assert_eq!(campaign.play_count, 12);

        aggregator.stop().await;
    }

    #[tokio::test]
    async fn test_restart_after_stop_arms_fresh_timer() {
        let aggregator = Arc::new(BatchAggregator::new(
            Arc::new(EventQueue::new()),
            Arc::new(StatsStore::in_memory()),
            AggregatorConfig::new(20, 10).unwrap(),
        ));

        aggregator.start().await;
        aggregator.stop().await;

        fill(aggregator.queue(), 3);
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Stopped: nothing drains
        assert_eq!(aggregator.queue().size(), 3);

        assert!(aggregator.start().await);
        fill(aggregator.queue(), 2);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(aggregator.queue().size(), 0);

        aggregator.stop().await;
    }

    #[tokio::test]
    async fn test_reset_clears_queue_and_store() {
        let aggregator = make_aggregator(2);
        fill(aggregator.queue(), 5);
        aggregator.run_batch().await;

        let dropped = aggregator.reset().await.unwrap();

        assert_eq!(dropped, 3);
        assert!(aggregator.queue().is_empty());
        assert!(aggregator.store().snapshot().await.unwrap().campaigns.is_empty());
    }

    #[tokio::test]
    async fn test_stop_waits_for_resume_batch() {
        let aggregator = Arc::new(BatchAggregator::new(
            Arc::new(EventQueue::new()),
            Arc::new(StatsStore::new(Arc::new(ScriptedBackend::new(
                "none",
                Duration::from_millis(20),
            )))),
            AggregatorConfig::new(60_000, 10).unwrap(),
        ));
        aggregator.start().await;
        assert!(aggregator.transition(RunState::Running, RunState::Paused));
        fill(aggregator.queue(), 3);

        let resumer = {
            let aggregator = aggregator.clone();
            tokio::spawn(async move { aggregator.resume_and_drain().await })
        };
        while aggregator.run_state() != RunState::Running {
            tokio::task::yield_now().await;
        }

        assert!(aggregator.stop().await);

        // Nothing of the resume batch may land after stop() returned
        assert!(aggregator.queue().is_empty());
        assert_eq!(aggregator.metrics().processed, 3);
        assert!(matches!(
            resumer.await.unwrap(),
            Some(BatchOutcome::Completed(BatchReport { processed: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn test_resume_and_drain_requires_paused() {
        let aggregator = make_aggregator(10);
        fill(aggregator.queue(), 2);

        assert_eq!(aggregator.resume_and_drain().await, None);
        assert_eq!(aggregator.queue().size(), 2);
    }
}
