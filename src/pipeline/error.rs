//! Error types for ingestion, storage and batch application
//!
//! None of these are fatal to the aggregator: validation errors go back to
//! the caller, apply errors are logged and the offending event is dropped.

/// A play event was rejected at the ingestion boundary and never enqueued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field was absent or empty.
    #[error("invalid event format: missing required field `{0}` (required: screen_id, campaign_id, timestamp)")]
    MissingField(&'static str),
}

/// Failure inside a stats backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A thread panicked while holding the backend lock.
    #[error("stats backend lock poisoned")]
    Poisoned,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Folding one event into the stats store failed.
///
/// Carries the event keys so the log line identifies what was dropped.
#[derive(Debug, thiserror::Error)]
#[error("failed to apply event (campaign: {campaign_id}, screen: {screen_id}): {source}")]
pub struct ApplyError {
    pub campaign_id: String,
    pub screen_id: String,
    #[source]
    pub source: StoreError,
}

/// A line from an event source could not be turned into a queued event.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_display_names_event() {
        let err = ApplyError {
            campaign_id: "c1".to_string(),
            screen_id: "s1".to_string(),
            source: StoreError::Backend("disk full".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "failed to apply event (campaign: c1, screen: s1): backend error: disk full"
        );
    }

    #[test]
    fn test_validation_error_converts_into_ingest_error() {
        let err: IngestError = ValidationError::MissingField("timestamp").into();
        assert!(matches!(err, IngestError::Validation(_)));
        assert!(err.to_string().contains("`timestamp`"));
    }
}
