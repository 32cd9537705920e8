//! Core data structures for play ingestion and aggregation
//!
//! - `PlayEvent` - caller-supplied play record (validated at the queue boundary)
//! - `QueuedEvent` - accepted event stamped with its ingestion time
//! - `CampaignRecord` / `ScreenRecord` - cumulative per-key statistics
//! - `StatsSnapshot` - read-only view returned to query consumers

use super::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A play event as submitted by a display device
///
/// Missing JSON fields deserialize to empty strings so that a single
/// `validate()` call covers both absent and empty values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayEvent {
    #[serde(default)]
    pub screen_id: String,

    #[serde(default)]
    pub campaign_id: String,

    /// ISO-8601 string supplied by the device, not checked for monotonicity
    #[serde(default)]
    pub timestamp: String,
}

impl PlayEvent {
    pub fn new(
        screen_id: impl Into<String>,
        campaign_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            screen_id: screen_id.into(),
            campaign_id: campaign_id.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Check that every required field is present and non-empty
    ///
    /// Fields are checked in wire order (screen_id, campaign_id, timestamp)
    /// and the first offender is reported. Whitespace counts as a value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.screen_id.is_empty() {
            return Err(ValidationError::MissingField("screen_id"));
        }
        if self.campaign_id.is_empty() {
            return Err(ValidationError::MissingField("campaign_id"));
        }
        if self.timestamp.is_empty() {
            return Err(ValidationError::MissingField("timestamp"));
        }
        Ok(())
    }
}

/// An accepted event waiting in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEvent {
    #[serde(flatten)]
    pub event: PlayEvent,

    /// Assigned by the queue at acceptance time
    pub queued_at: DateTime<Utc>,
}

impl QueuedEvent {
    pub fn screen_id(&self) -> &str {
        &self.event.screen_id
    }

    pub fn campaign_id(&self) -> &str {
        &self.event.campaign_id
    }

    pub fn timestamp(&self) -> &str {
        &self.event.timestamp
    }
}

/// Cumulative statistics for one campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub campaign_id: String,
    pub play_count: u64,
    pub screen_ids: BTreeSet<String>,

    /// Timestamp of the most recently *processed* event (queue order, not max)
    pub last_played: Option<String>,
}

impl CampaignRecord {
    pub fn new(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            play_count: 0,
            screen_ids: BTreeSet::new(),
            last_played: None,
        }
    }

    /// Fold a delta into this record (increment, add-to-set, set-field)
    pub fn merge(&mut self, delta: &CampaignDelta) {
        self.play_count += delta.plays;
        self.screen_ids.insert(delta.screen_id.clone());
        self.last_played = Some(delta.last_played.clone());
    }
}

/// Cumulative statistics for one screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRecord {
    pub screen_id: String,
    pub impression_count: u64,
    pub campaign_ids: BTreeSet<String>,
}

impl ScreenRecord {
    pub fn new(screen_id: impl Into<String>) -> Self {
        Self {
            screen_id: screen_id.into(),
            impression_count: 0,
            campaign_ids: BTreeSet::new(),
        }
    }

    pub fn merge(&mut self, delta: &ScreenDelta) {
        self.impression_count += delta.impressions;
        self.campaign_ids.insert(delta.campaign_id.clone());
    }
}

/// Campaign-side change produced by one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignDelta {
    pub plays: u64,
    pub screen_id: String,
    pub last_played: String,
}

/// Screen-side change produced by one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenDelta {
    pub impressions: u64,
    pub campaign_id: String,
}

impl From<&QueuedEvent> for CampaignDelta {
    fn from(event: &QueuedEvent) -> Self {
        Self {
            plays: 1,
            screen_id: event.screen_id().to_string(),
            last_played: event.timestamp().to_string(),
        }
    }
}

impl From<&QueuedEvent> for ScreenDelta {
    fn from(event: &QueuedEvent) -> Self {
        Self {
            impressions: 1,
            campaign_id: event.campaign_id().to_string(),
        }
    }
}

/// Point-in-time view of all aggregated statistics
///
/// Both lists are sorted descending by their count field; ties keep
/// first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub campaigns: Vec<CampaignRecord>,
    pub screens: Vec<ScreenRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reports_first_missing_field() {
        assert_eq!(PlayEvent::new("s1", "c1", "T1").validate(), Ok(()));
        assert_eq!(
            PlayEvent::new("", "c1", "T1").validate(),
            Err(ValidationError::MissingField("screen_id"))
        );
        assert_eq!(
            PlayEvent::new("s1", "", "T1").validate(),
            Err(ValidationError::MissingField("campaign_id"))
        );
        assert_eq!(
            PlayEvent::new("s1", "c1", "").validate(),
            Err(ValidationError::MissingField("timestamp"))
        );
    }

    #[test]
    fn test_whitespace_only_fields_are_accepted() {
        assert_eq!(PlayEvent::new(" ", "c1", "T1").validate(), Ok(()));
        assert_eq!(PlayEvent::new("s1", "  ", "T1").validate(), Ok(()));
        assert_eq!(PlayEvent::new("s1", "c1", "\t").validate(), Ok(()));
    }

    #[test]
    fn test_missing_json_fields_fail_validation() {
        let event: PlayEvent =
            serde_json::from_str(r#"{"screen_id":"screen-101","timestamp":"2025-10-20T08:00:00Z"}"#)
                .unwrap();
        assert_eq!(event.campaign_id, "");
        assert_eq!(
            event.validate(),
            Err(ValidationError::MissingField("campaign_id"))
        );
    }

    #[test]
    fn test_campaign_merge_keeps_set_semantics() {
        let mut record = CampaignRecord::new("c1");
        for (screen, ts) in [("s1", "T1"), ("s1", "T3"), ("s2", "T2")] {
            record.merge(&CampaignDelta {
                plays: 1,
                screen_id: screen.to_string(),
                last_played: ts.to_string(),
            });
        }

        assert_eq!(record.play_count, 3);
        assert_eq!(record.screen_ids.len(), 2);
        // Last processed wins, even though T3 > T2
        assert_eq!(record.last_played.as_deref(), Some("T2"));
    }

    #[test]
    fn test_queued_event_serializes_flat() {
        let queued = QueuedEvent {
            event: PlayEvent::new("s1", "c1", "T1"),
            queued_at: Utc::now(),
        };
        let value = serde_json::to_value(&queued).unwrap();
        assert_eq!(value["screen_id"], "s1");
        assert_eq!(value["campaign_id"], "c1");
        assert!(value.get("queued_at").is_some());
    }
}
