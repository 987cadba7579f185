//! Job bodies and the dispatcher that routes dequeued jobs to them.

mod embedding;
mod fetch;

pub use embedding::{ComputeEmbeddingJob, EmbeddingOutcome};
pub use fetch::FetchItemJob;

use async_trait::async_trait;
use tracing::debug;

use crate::error::HarvestError;
use crate::queue::{JobPayload, JobRecord};

fn failure(err: HarvestError) -> DispatchStatus {
    let error = err.to_string();
    if err.is_transient() {
        DispatchStatus::Retry { error }
    } else {
        DispatchStatus::Failed { error }
    }
}

/// Outcome of dispatcher execution for a single job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DispatchStatus {
    Success,
    /// Nothing to do for this item; the job still counts as finished.
    Discarded { reason: String },
    /// A dependency was down. Run the job again after a backoff.
    Retry { error: String },
    Failed { error: String },
}

impl DispatchStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, DispatchStatus::Failed { .. })
    }
}

/// Primary contract exposed to worker loops for executing dequeued jobs.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &JobRecord) -> DispatchStatus;
}

/// Routes fetch and embedding jobs to their bodies.
#[derive(Clone, Debug)]
pub struct HarvestDispatcher {
    fetch: FetchItemJob,
    embed: ComputeEmbeddingJob,
}

impl HarvestDispatcher {
    pub fn new(fetch: FetchItemJob, embed: ComputeEmbeddingJob) -> Self {
        Self { fetch, embed }
    }
}

#[async_trait]
impl JobDispatcher for HarvestDispatcher {
    async fn dispatch(&self, job: &JobRecord) -> DispatchStatus {
        match job.payload {
            // An untracked upstream item is an expected outcome of backfill.
            JobPayload::FetchItem { id } => match self.fetch.run(id).await {
                Ok(_) => DispatchStatus::Success,
                Err(HarvestError::MalformedItem { reason, .. }) => {
                    DispatchStatus::Discarded { reason }
                }
                Err(err) => failure(err),
            },
            JobPayload::ComputeEmbedding { id } => match self.embed.run(id).await {
                Ok(outcome) => {
                    debug!(target: "harvest::worker", item = %id, ?outcome, "embedding job done");
                    DispatchStatus::Success
                }
                Err(err) => failure(err),
            },
        }
    }
}
