//! In-memory stats backend (default)

use super::error::StoreError;
use super::store::StatsBackend;
use super::types::{CampaignDelta, CampaignRecord, QueuedEvent, ScreenDelta, ScreenRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Records kept in first-seen order with a key index
///
/// Vec order is insertion order, so a stable sort by count gives the
/// required tie-breaking for free.
#[derive(Default)]
struct MemoryState {
    campaigns: Vec<CampaignRecord>,
    campaign_index: HashMap<String, usize>,
    screens: Vec<ScreenRecord>,
    screen_index: HashMap<String, usize>,
}

impl MemoryState {
    fn campaign_mut(&mut self, campaign_id: &str) -> &mut CampaignRecord {
        let idx = match self.campaign_index.get(campaign_id) {
            Some(&idx) => idx,
            None => {
                self.campaigns.push(CampaignRecord::new(campaign_id));
                let idx = self.campaigns.len() - 1;
                self.campaign_index.insert(campaign_id.to_string(), idx);
                idx
            }
        };
        &mut self.campaigns[idx]
    }

    fn screen_mut(&mut self, screen_id: &str) -> &mut ScreenRecord {
        let idx = match self.screen_index.get(screen_id) {
            Some(&idx) => idx,
            None => {
                self.screens.push(ScreenRecord::new(screen_id));
                let idx = self.screens.len() - 1;
                self.screen_index.insert(screen_id.to_string(), idx);
                idx
            }
        };
        &mut self.screens[idx]
    }
}

#[derive(Default)]
pub struct MemoryStatsBackend {
    state: Mutex<MemoryState>,
}

impl MemoryStatsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl StatsBackend for MemoryStatsBackend {
    async fn upsert_campaign(
        &self,
        campaign_id: &str,
        delta: &CampaignDelta,
    ) -> Result<(), StoreError> {
        self.lock()?.campaign_mut(campaign_id).merge(delta);
        Ok(())
    }

    async fn upsert_screen(&self, screen_id: &str, delta: &ScreenDelta) -> Result<(), StoreError> {
        self.lock()?.screen_mut(screen_id).merge(delta);
        Ok(())
    }

    async fn list_campaigns(&self) -> Result<Vec<CampaignRecord>, StoreError> {
        let mut campaigns = self.lock()?.campaigns.clone();
        campaigns.sort_by(|a, b| b.play_count.cmp(&a.play_count));
        Ok(campaigns)
    }

    async fn list_screens(&self) -> Result<Vec<ScreenRecord>, StoreError> {
        let mut screens = self.lock()?.screens.clone();
        screens.sort_by(|a, b| b.impression_count.cmp(&a.impression_count));
        Ok(screens)
    }

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<CampaignRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .campaign_index
            .get(campaign_id)
            .map(|&idx| state.campaigns[idx].clone()))
    }

    async fn find_screen(&self, screen_id: &str) -> Result<Option<ScreenRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .screen_index
            .get(screen_id)
            .map(|&idx| state.screens[idx].clone()))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.lock()? = MemoryState::default();
        Ok(())
    }

    // Both sides under one lock acquisition
    async fn apply_event(&self, event: &QueuedEvent) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .campaign_mut(event.campaign_id())
            .merge(&CampaignDelta::from(event));
        state
            .screen_mut(event.screen_id())
            .merge(&ScreenDelta::from(event));
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(screen: &str) -> CampaignDelta {
        CampaignDelta {
            plays: 1,
            screen_id: screen.to_string(),
            last_played: "T".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ties_keep_first_seen_order() {
        let backend = MemoryStatsBackend::new();
        for id in ["x", "y", "z"] {
            backend.upsert_campaign(id, &delta("s1")).await.unwrap();
        }
        backend.upsert_campaign("z", &delta("s1")).await.unwrap();

        let ids: Vec<String> = backend
            .list_campaigns()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.campaign_id)
            .collect();
        assert_eq!(ids, vec!["z", "x", "y"]);
    }

    #[tokio::test]
    async fn test_screen_upsert_adds_campaign_once() {
        let backend = MemoryStatsBackend::new();
        let delta = ScreenDelta {
            impressions: 1,
            campaign_id: "c1".to_string(),
        };
        backend.upsert_screen("s1", &delta).await.unwrap();
        backend.upsert_screen("s1", &delta).await.unwrap();

        let screen = backend.find_screen("s1").await.unwrap().unwrap();
        assert_eq!(screen.impression_count, 2);
        assert_eq!(screen.campaign_ids.len(), 1);
        assert!(backend.find_screen("missing").await.unwrap().is_none());
    }
}
