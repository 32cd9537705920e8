//! Stats store: per-campaign and per-screen running counters
//!
//! `StatsStore` is the aggregator-owned front door. Storage itself is
//! delegated to a `StatsBackend` (in-memory or SQLite), so the same
//! apply/snapshot contract holds regardless of where records live.
//!
//! ## Atomicity
//!
//! A store-level read/write gate wraps every operation. `apply_event`
//! holds the write side across both upserts, `snapshot` holds the read
//! side across both listings, so readers always observe some prefix of
//! applied events and never half of one.

use super::error::{ApplyError, StoreError};
use super::types::{
    CampaignDelta, CampaignRecord, QueuedEvent, ScreenDelta, ScreenRecord, StatsSnapshot,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence boundary for aggregated statistics
///
/// Listing methods MUST return records sorted descending by count, with
/// ties in first-seen order.
#[async_trait]
pub trait StatsBackend: Send + Sync {
    /// Increment `play_count`, add `screen_id` to the set, overwrite
    /// `last_played`. Creates the record on first use.
    async fn upsert_campaign(
        &self,
        campaign_id: &str,
        delta: &CampaignDelta,
    ) -> Result<(), StoreError>;

    /// Increment `impression_count`, add `campaign_id` to the set.
    async fn upsert_screen(&self, screen_id: &str, delta: &ScreenDelta) -> Result<(), StoreError>;

    async fn list_campaigns(&self) -> Result<Vec<CampaignRecord>, StoreError>;

    async fn list_screens(&self) -> Result<Vec<ScreenRecord>, StoreError>;

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<CampaignRecord>, StoreError>;

    async fn find_screen(&self, screen_id: &str) -> Result<Option<ScreenRecord>, StoreError>;

    /// Remove every record
    async fn clear(&self) -> Result<(), StoreError>;

    /// Fold one event into both sides
    ///
    /// Default runs the two upserts in sequence. Backends that can do both
    /// in one transaction should override this.
    async fn apply_event(&self, event: &QueuedEvent) -> Result<(), StoreError> {
        self.upsert_campaign(event.campaign_id(), &CampaignDelta::from(event))
            .await?;
        self.upsert_screen(event.screen_id(), &ScreenDelta::from(event))
            .await
    }

    /// Backend label for logging
    fn backend_type(&self) -> &'static str;
}

/// Aggregated statistics, mutated only by the batch aggregator
pub struct StatsStore {
    backend: Arc<dyn StatsBackend>,
    gate: RwLock<()>,
}

impl StatsStore {
    pub fn new(backend: Arc<dyn StatsBackend>) -> Self {
        log::info!("📦 Stats store ready (backend: {})", backend.backend_type());
        Self {
            backend,
            gate: RwLock::new(()),
        }
    }

    /// Store backed by a fresh in-memory backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(super::memory::MemoryStatsBackend::new()))
    }

    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    /// Apply one event: +1 play/impression, set membership, last_played
    ///
    /// No deduplication: applying the same event twice counts it twice.
    pub async fn apply_event(&self, event: &QueuedEvent) -> Result<(), ApplyError> {
        let _write = self.gate.write().await;

        self.backend
            .apply_event(event)
            .await
            .map_err(|source| ApplyError {
                campaign_id: event.campaign_id().to_string(),
                screen_id: event.screen_id().to_string(),
                source,
            })
    }

    /// All campaigns and screens, each sorted descending by count
    pub async fn snapshot(&self) -> Result<StatsSnapshot, StoreError> {
        let _read = self.gate.read().await;

        let campaigns = self.backend.list_campaigns().await?;
        let screens = self.backend.list_screens().await?;

        Ok(StatsSnapshot { campaigns, screens })
    }

    pub async fn campaign(&self, campaign_id: &str) -> Result<Option<CampaignRecord>, StoreError> {
        let _read = self.gate.read().await;
        self.backend.find_campaign(campaign_id).await
    }

    pub async fn screen(&self, screen_id: &str) -> Result<Option<ScreenRecord>, StoreError> {
        let _read = self.gate.read().await;
        self.backend.find_screen(screen_id).await
    }

    /// Remove every record
    pub async fn reset(&self) -> Result<(), StoreError> {
        let _write = self.gate.write().await;
        self.backend.clear().await
    }
}
