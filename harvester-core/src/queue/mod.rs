//! Work queue port and its implementations.

mod job;
mod memory;
mod redis;

pub use job::{JobPayload, JobRecord, JobSpec, JobState};
pub use memory::InMemoryQueue;
pub use redis::RedisJobQueue;

use std::time::Duration;

use async_trait::async_trait;
use harvester_model::JobKey;

use crate::error::Result;

/// Contract between producers (backfill, scanner), the eligibility filter
/// and the workers.
///
/// A job key that is present in the queue, in any state, counts as in
/// flight. Records disappear once their retention TTL lapses.
///
/// Dequeued jobs are leased. A running job whose lease lapses (the worker
/// crashed, or lost the queue before reporting back) is put back on the
/// pending list by the next `dequeue`.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, job: JobSpec) -> Result<()> {
        self.enqueue_many(vec![job]).await.map(|_| ())
    }

    /// Enqueues a batch in one round trip. Either the whole batch lands or
    /// the call fails. Enqueueing a key that already exists replaces the
    /// old record.
    async fn enqueue_many(&self, jobs: Vec<JobSpec>) -> Result<usize>;

    /// Looks up records by key in one round trip. The result is aligned
    /// with `keys`; absent jobs are `None`.
    async fn fetch_jobs(&self, keys: &[JobKey]) -> Result<Vec<Option<JobRecord>>>;

    /// Requeues lapsed leases and retries whose delay has passed, then pops
    /// the oldest queued job and marks it running under a lease of
    /// `lease_ttl`. The pop and the lease are one atomic step; the returned
    /// record already counts this run in `attempts`.
    async fn dequeue(&self, lease_ttl: Duration) -> Result<Option<JobRecord>>;

    async fn complete(&self, key: &JobKey, result_ttl: Duration) -> Result<()>;

    async fn fail(&self, key: &JobKey, error: &str, failure_ttl: Duration) -> Result<()>;

    /// Releases the lease and puts the job back as queued. It becomes
    /// eligible for `dequeue` once `delay` has passed. Terminal records are
    /// left alone.
    async fn retry(&self, key: &JobKey, error: &str, delay: Duration) -> Result<()>;

    /// Jobs waiting to be picked up.
    async fn depth(&self) -> Result<usize>;
}
