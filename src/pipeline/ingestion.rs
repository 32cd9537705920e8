//! Ingestion boundary - turns raw device input into queued events
//!
//! Ingestion only validates and enqueues; it never waits on aggregation.
//! Rejected input is reported to the caller (or logged, for the file
//! source) and never reaches the queue.

use super::error::IngestError;
use super::queue::EventQueue;
use super::tail::TailReader;
use super::types::{PlayEvent, QueuedEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Parse one JSON object and enqueue it
pub fn ingest_json_line(queue: &EventQueue, line: &str) -> Result<QueuedEvent, IngestError> {
    let event: PlayEvent = serde_json::from_str(line)?;
    Ok(queue.enqueue(event)?)
}

/// Counters for one ingestion source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Follow a JSONL device log and enqueue every new line
///
/// Existing content is skipped (no historical replay). Malformed or
/// invalid lines are logged and skipped. Runs until `shutdown` flips to
/// true or its sender is dropped.
pub async fn tail_event_log(
    path: PathBuf,
    queue: Arc<EventQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<IngestStats, IngestError> {
    let mut reader = TailReader::new(path.clone());
    reader.start().await?;

    log::info!("🚀 Starting event log ingestion");
    log::info!("   └─ Source: {}", path.display());

    let mut stats = IngestStats::default();
    let mut last_log_time = std::time::Instant::now();

    loop {
        let line = tokio::select! {
            line = reader.read_line() => line?,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        match ingest_json_line(&queue, &line) {
            Ok(_) => stats.accepted += 1,
            Err(e) => {
                stats.rejected += 1;
                log::warn!("⚠️  Skipping event line: {} ({})", e, truncate(&line, 120));
            }
        }

        if last_log_time.elapsed().as_secs() >= 10 {
            log::info!(
                "📊 Ingestion: {} accepted, {} rejected | queue: {}",
                stats.accepted,
                stats.rejected,
                queue.size()
            );
            last_log_time = std::time::Instant::now();
        }
    }

    log::info!(
        "✅ Event log ingestion stopped ({} accepted, {} rejected)",
        stats.accepted,
        stats.rejected
    );
    Ok(stats)
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ValidationError;
    use tokio::io::AsyncWriteExt;
    use tokio::time::Duration;

    #[test]
    fn test_ingest_json_line_enqueues_valid_event() {
        let queue = EventQueue::new();
        let queued = ingest_json_line(
            &queue,
            r#"{"screen_id":"screen-101","campaign_id":"cmp-2025-123","timestamp":"2025-10-20T08:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(queued.campaign_id(), "cmp-2025-123");
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_ingest_json_line_rejects_bad_input() {
        let queue = EventQueue::new();

        let err = ingest_json_line(&queue, "not json").unwrap_err();
        assert!(matches!(err, IngestError::Json(_)));

        let err = ingest_json_line(&queue, r#"{"screen_id":"s1","campaign_id":"c1"}"#).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Validation(ValidationError::MissingField("timestamp"))
        ));

        assert!(queue.is_empty());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_tail_event_log_feeds_queue_until_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("plays.jsonl");
        tokio::fs::write(&path, b"{\"screen_id\":\"old\",\"campaign_id\":\"c0\",\"timestamp\":\"T0\"}\n")
            .await
            .unwrap();

        let queue = Arc::new(EventQueue::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(tail_event_log(path.clone(), queue.clone(), shutdown_rx));

        // Let the reader open and seek to the end
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(
            b"{\"screen_id\":\"s1\",\"campaign_id\":\"c1\",\"timestamp\":\"T1\"}\n\
              garbage\n\
              {\"screen_id\":\"s2\",\"campaign_id\":\"c1\",\"timestamp\":\"T2\"}\n",
        )
        .await
        .unwrap();
        file.flush().await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(stats, IngestStats { accepted: 2, rejected: 1 });
        assert_eq!(queue.dequeue().unwrap().screen_id(), "s1");
        assert_eq!(queue.dequeue().unwrap().screen_id(), "s2");
        assert!(queue.dequeue().is_none());
    }
}
