use {
    crate::pipeline::{CampaignRecord, StatsSnapshot, StatsStore, StoreError},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{fs, path::Path, sync::Arc, time::Duration},
    tokio::{sync::watch, time::interval},
};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Report writer configuration
pub struct ReportConfig {
    pub file_path: String,
    pub refresh_interval: Duration,
}

/// One row of the campaign report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign_id: String,
    pub play_count: u64,
    /// Number of unique screens
    pub screens: usize,
    pub last_played: Option<String>,
    pub screen_ids: Vec<String>,
}

impl From<&CampaignRecord> for CampaignSummary {
    fn from(record: &CampaignRecord) -> Self {
        Self {
            campaign_id: record.campaign_id.clone(),
            play_count: record.play_count,
            screens: record.screen_ids.len(),
            last_played: record.last_played.clone(),
            screen_ids: record.screen_ids.iter().cloned().collect(),
        }
    }
}

/// Dashboard-facing campaign statistics, in snapshot order (most plays first)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub total_campaigns: usize,
    pub campaigns: Vec<CampaignSummary>,
    pub generated_at: DateTime<Utc>,
}

impl CampaignReport {
    pub fn from_snapshot(snapshot: &StatsSnapshot) -> Self {
        let campaigns: Vec<CampaignSummary> =
            snapshot.campaigns.iter().map(CampaignSummary::from).collect();

        Self {
            total_campaigns: campaigns.len(),
            campaigns,
            generated_at: Utc::now(),
        }
    }
}

/// Write the report as pretty JSON, via a temp file so readers never see a torn write
pub fn save_report(report: &CampaignReport, file_path: &str) -> Result<(), ReportError> {
    let json = serde_json::to_string_pretty(report)?;

    if let Some(parent) = Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = format!("{}.tmp", file_path);
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, file_path)?;

    log::debug!("Saved report ({} campaigns) to {}", report.total_campaigns, file_path);
    Ok(())
}

/// Snapshot the store and write the report once
pub async fn write_report(store: &StatsStore, file_path: &str) -> Result<CampaignReport, ReportError> {
    let snapshot = store.snapshot().await?;
    let report = CampaignReport::from_snapshot(&snapshot);
    save_report(&report, file_path)?;
    Ok(report)
}

/// Background task that periodically refreshes the campaign report
///
/// Writes one final report on shutdown.
pub async fn report_task(
    store: Arc<StatsStore>,
    config: ReportConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval_timer = interval(config.refresh_interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        if let Err(e) = write_report(&store, &config.file_path).await {
            log::warn!("Failed to write campaign report: {}", e);
        }
    }

    match write_report(&store, &config.file_path).await {
        Ok(report) => log::info!(
            "📝 Final report written: {} campaigns -> {}",
            report.total_campaigns,
            config.file_path
        ),
        Err(e) => log::warn!("Failed to write final campaign report: {}", e),
    }
}
