use std::time::Duration;

use harvester_model::ItemId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Upstream feed unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed item {id}: {reason}")]
    MalformedItem { id: ItemId, reason: String },

    #[error("Keyed store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Work queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Scan made no progress: cursor {cursor} was returned twice")]
    NonProgressingScan { cursor: u64 },

    #[error("Scan abandoned after {elapsed:?} (budget {budget:?})")]
    ScanBudgetExceeded { elapsed: Duration, budget: Duration },

    #[error("Corrupt persisted state under '{key}': {reason}")]
    CorruptState { key: String, reason: String },

    #[error("Embedding computation failed: {0}")]
    Embedding(String),

    #[error("Embedding codec error: {0}")]
    Codec(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarvestError {
    /// Failures of a dependency rather than of the item itself. A job that
    /// hit one is worth running again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HarvestError::UpstreamUnavailable(_)
                | HarvestError::StoreUnavailable(_)
                | HarvestError::QueueUnavailable(_)
        )
    }
}


pub type Result<T> = std::result::Result<T, HarvestError>;
