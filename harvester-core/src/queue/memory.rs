use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvester_model::JobKey;
use tokio::sync::Mutex;

use super::WorkQueue;
use super::job::{JobRecord, JobSpec, JobState};
use crate::error::{HarvestError, Result};

fn deadline(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[derive(Debug)]
struct StoredJob {
    record: JobRecord,
    expires_at: Option<DateTime<Utc>>,
    seq: u64,
}

impl StoredJob {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobKey, StoredJob>,
    pending: VecDeque<JobKey>,
    /// Retries waiting for their delay, with the time they become due.
    deferred: Vec<(DateTime<Utc>, JobKey)>,
    next_seq: u64,
    offline: bool,
}

impl QueueState {
    /// Drops expired records, and list entries that no longer point at a
    /// queued record.
    fn prune(&mut self, now: DateTime<Utc>) {
        let QueueState {
            jobs,
            pending,
            deferred,
            ..
        } = self;
        jobs.retain(|_, job| job.is_live(now));
        let queued = |key: &JobKey| {
            jobs.get(key)
                .is_some_and(|job| job.record.state == JobState::Queued)
        };
        pending.retain(|key| queued(key));
        deferred.retain(|(_, key)| queued(key));
    }

    /// Moves due retries and lapsed leases onto the pending list.
    fn requeue_due(&mut self, now: DateTime<Utc>) {
        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.deferred = waiting;
        due.sort_by_key(|(at, _)| *at);
        self.pending.extend(due.into_iter().map(|(_, key)| key));

        let mut lapsed: Vec<(u64, JobKey)> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.record.lease_lapsed(now))
            .map(|(key, job)| (job.seq, key.clone()))
            .collect();
        lapsed.sort();
        for (_, key) in lapsed {
            if let Some(job) = self.jobs.get_mut(&key) {
                job.record.state = JobState::Queued;
                job.record.started_at = None;
                job.record.lease_expires_at = None;
                job.record.error = Some("lease expired".to_string());
                self.pending.push_back(key);
            }
        }
    }

    fn retire(&mut self, key: &JobKey, ttl: Duration, update: impl FnOnce(&mut JobRecord)) {
        let now = Utc::now();
        if let Some(job) = self.jobs.get_mut(key) {
            update(&mut job.record);
            job.record.ended_at = Some(now);
            job.record.lease_expires_at = None;
            job.expires_at = deadline(now, ttl);
        }
    }
}

/// Process-local [`WorkQueue`] with the same retention and lease semantics
/// as the Redis queue. Expired records are pruned at the start of every call.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    round_trips: Arc<AtomicUsize>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn reset_round_trips(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
    }

    /// Every subsequent call fails with [`HarvestError::QueueUnavailable`].
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Live records in enqueue order.
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut jobs: Vec<&StoredJob> = state
            .jobs
            .values()
            .filter(|job| job.is_live(now))
            .collect();
        jobs.sort_by_key(|job| job.seq);
        jobs.into_iter().map(|job| job.record.clone()).collect()
    }

    pub async fn pending_keys(&self) -> Vec<JobKey> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    /// Records held in memory, expired or not.
    pub async fn stored_records(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, QueueState>> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(HarvestError::QueueUnavailable(
                "in-memory queue is offline".to_string(),
            ));
        }
        state.prune(Utc::now());
        Ok(state)
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn enqueue_many(&self, jobs: Vec<JobSpec>) -> Result<usize> {
        let mut state = self.lock().await?;
        let count = jobs.len();
        for spec in jobs {
            let record = JobRecord::queued(spec);
            let key = record.key.clone();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.jobs.insert(
                key.clone(),
                StoredJob {
                    record,
                    expires_at: None,
                    seq,
                },
            );
            state.pending.push_back(key);
        }
        Ok(count)
    }

    async fn fetch_jobs(&self, keys: &[JobKey]) -> Result<Vec<Option<JobRecord>>> {
        let state = self.lock().await?;
        Ok(keys
            .iter()
            .map(|key| state.jobs.get(key).map(|job| job.record.clone()))
            .collect())
    }

    async fn dequeue(&self, lease_ttl: Duration) -> Result<Option<JobRecord>> {
        let mut state = self.lock().await?;
        let now = Utc::now();
        state.requeue_due(now);
        while let Some(key) = state.pending.pop_front() {
            let Some(job) = state.jobs.get_mut(&key) else {
                continue;
            };
            if job.record.state != JobState::Queued {
                continue;
            }
            job.record.state = JobState::Running;
            job.record.started_at = Some(now);
            job.record.attempts = job.record.attempts.saturating_add(1);
            job.record.lease_expires_at = deadline(now, lease_ttl);
            return Ok(Some(job.record.clone()));
        }
        Ok(None)
    }

    async fn complete(&self, key: &JobKey, result_ttl: Duration) -> Result<()> {
        let mut state = self.lock().await?;
        state.retire(key, result_ttl, |record| record.state = JobState::Finished);
        Ok(())
    }

    async fn fail(&self, key: &JobKey, error: &str, failure_ttl: Duration) -> Result<()> {
        let mut state = self.lock().await?;
        state.retire(key, failure_ttl, |record| {
            record.state = JobState::Failed;
            record.error = Some(error.to_string());
        });
        Ok(())
    }

    async fn retry(&self, key: &JobKey, error: &str, delay: Duration) -> Result<()> {
        let mut state = self.lock().await?;
        let now = Utc::now();
        let Some(job) = state.jobs.get_mut(key) else {
            return Ok(());
        };
        if job.record.state.is_terminal() {
            return Ok(());
        }
        job.record.state = JobState::Queued;
        job.record.started_at = None;
        job.record.lease_expires_at = None;
        job.record.error = Some(error.to_string());

        let due = deadline(now, delay).unwrap_or(now);
        state.deferred.push((due, key.clone()));
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let state = self.lock().await?;
        Ok(state.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use harvester_model::ItemId;

    use super::*;

    const LEASE: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn jobs_are_dequeued_in_enqueue_order() {
        let queue = InMemoryQueue::new();
        queue
            .enqueue_many(vec![
                JobSpec::fetch(ItemId(1), Duration::from_secs(60)),
                JobSpec::fetch(ItemId(2), Duration::from_secs(60)),
            ])
            .await
            .expect("enqueue");

        let first = queue.dequeue(LEASE).await.expect("dequeue").expect("job");
        let second = queue.dequeue(LEASE).await.expect("dequeue").expect("job");
        assert_eq!(first.payload.item_id(), ItemId(1));
        assert_eq!(second.payload.item_id(), ItemId(2));
        assert_eq!(first.state, JobState::Running);
        assert_eq!(first.attempts, 1);
        assert!(first.lease_expires_at.is_some());
        assert!(queue.dequeue(LEASE).await.expect("dequeue").is_none());
    }

    #[tokio::test]
    async fn finished_jobs_stay_visible_until_their_ttl_lapses() {
        let queue = InMemoryQueue::new();
        let kept = JobSpec::embedding(ItemId(10), Duration::from_secs(60));
        let dropped = JobSpec::embedding(ItemId(11), Duration::ZERO);
        let keys = vec![kept.key.clone(), dropped.key.clone()];
        queue.enqueue_many(vec![kept, dropped]).await.expect("enqueue");

        while let Some(job) = queue.dequeue(LEASE).await.expect("dequeue") {
            queue
                .complete(&job.key, job.result_ttl)
                .await
                .expect("complete");
        }

        let found = queue.fetch_jobs(&keys).await.expect("fetch");
        assert_eq!(
            found[0].as_ref().map(|job| job.state),
            Some(JobState::Finished)
        );
        assert!(found[1].is_none());
    }

    #[tokio::test]
    async fn failed_jobs_keep_their_error() {
        let queue = InMemoryQueue::new();
        let spec = JobSpec::embedding(ItemId(3), Duration::from_secs(10));
        let key = spec.key.clone();
        queue.enqueue(spec).await.expect("enqueue");
        let job = queue.dequeue(LEASE).await.expect("dequeue").expect("job");

        queue
            .fail(&job.key, "no url", Duration::from_secs(3600))
            .await
            .expect("fail");

        let found = queue.fetch_jobs(&[key]).await.expect("fetch");
        let record = found[0].as_ref().expect("record retained");
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.error.as_deref(), Some("no url"));
    }

    #[tokio::test]
    async fn expired_records_and_stale_entries_are_pruned() {
        let queue = InMemoryQueue::new();
        let done = JobSpec::embedding(ItemId(20), Duration::ZERO);
        let twice = JobSpec::embedding(ItemId(21), Duration::from_secs(60));
        queue
            .enqueue_many(vec![done, twice.clone(), twice])
            .await
            .expect("enqueue");

        let job = queue.dequeue(LEASE).await.expect("dequeue").expect("job 20");
        queue.complete(&job.key, job.result_ttl).await.expect("complete");
        queue.dequeue(LEASE).await.expect("dequeue").expect("job 21");

        assert_eq!(queue.depth().await.expect("depth"), 0);
        assert_eq!(queue.stored_records().await, 1);
        assert!(queue.pending_keys().await.is_empty());
    }

    #[tokio::test]
    async fn lapsed_lease_puts_the_job_back() {
        let queue = InMemoryQueue::new();
        let spec = JobSpec::embedding(ItemId(30), Duration::from_secs(10));
        queue.enqueue(spec).await.expect("enqueue");

        let abandoned = queue
            .dequeue(Duration::ZERO)
            .await
            .expect("dequeue")
            .expect("job");
        assert_eq!(abandoned.attempts, 1);

        let again = queue.dequeue(LEASE).await.expect("dequeue").expect("requeued");
        assert_eq!(again.key, abandoned.key);
        assert_eq!(again.state, JobState::Running);
        assert_eq!(again.attempts, 2);
        assert_eq!(again.error.as_deref(), Some("lease expired"));
    }

    #[tokio::test]
    async fn retried_jobs_wait_out_their_delay() {
        let queue = InMemoryQueue::new();
        let spec = JobSpec::fetch(ItemId(40), Duration::from_secs(10));
        let key = spec.key.clone();
        queue.enqueue(spec).await.expect("enqueue");
        let job = queue.dequeue(LEASE).await.expect("dequeue").expect("job");

        queue
            .retry(&job.key, "feed down", Duration::from_secs(60))
            .await
            .expect("retry");

        assert!(queue.dequeue(LEASE).await.expect("dequeue").is_none());
        let record = queue.fetch_jobs(&[key.clone()]).await.expect("fetch")[0]
            .clone()
            .expect("still in flight");
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.error.as_deref(), Some("feed down"));

        queue.state.lock().await.deferred[0].0 = Utc::now();
        let job = queue.dequeue(LEASE).await.expect("dequeue").expect("due retry");
        assert_eq!(job.key, key);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn retry_leaves_finished_jobs_alone() {
        let queue = InMemoryQueue::new();
        let spec = JobSpec::embedding(ItemId(50), Duration::from_secs(60));
        queue.enqueue(spec).await.expect("enqueue");
        let job = queue.dequeue(LEASE).await.expect("dequeue").expect("job");
        queue.complete(&job.key, job.result_ttl).await.expect("complete");

        queue
            .retry(&job.key, "late report", Duration::ZERO)
            .await
            .expect("retry");

        let record = queue.fetch_jobs(&[job.key]).await.expect("fetch")[0]
            .clone()
            .expect("retained");
        assert_eq!(record.state, JobState::Finished);
        assert!(queue.dequeue(LEASE).await.expect("dequeue").is_none());
    }
}
