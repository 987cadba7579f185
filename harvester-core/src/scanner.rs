//! Eligibility scanner.
//!
//! Walks every item key in the store with the cursor protocol and, page by
//! page, narrows the keys down to items that need an embedding:
//!
//! 1. no embedding job exists for the item in any state, except a running
//!    job whose worker let its lease lapse,
//! 2. the item has no `embeddings` field yet,
//! 3. the item's score is at least the configured threshold.
//!
//! Each stage costs exactly one round trip per page. Survivors are enqueued
//! under their deterministic `embedding_<id>` key with one more round trip.
//! No scan state is persisted; every run re-derives eligibility from the
//! store and the queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use harvester_model::{ItemId, JobKey, KeyLayout, fields};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ScannerSettings;
use crate::error::{HarvestError, Result};
use crate::queue::{JobSpec, WorkQueue};
use crate::store::{KeyedStore, StorePipeline};

/// Counters for one full scan. Every key seen lands in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub pages: u64,
    pub keys_seen: u64,
    /// Keys matching the pattern that are not `<prefix>:<id>`.
    pub skipped_keys: u64,
    /// Keys already seen earlier in the same page.
    pub duplicate_keys: u64,
    pub in_flight: u64,
    pub already_computed: u64,
    pub below_threshold: u64,
    /// Items dropped because a pipelined reply for them was unreadable.
    pub unreadable: u64,
    pub enqueued: u64,
    /// Items whose embedding job was abandoned past its lease. Not a bucket:
    /// these go on through the remaining stages.
    pub lapsed_leases: u64,
}

impl ScanReport {
    fn absorb(&mut self, page: &ScanReport) {
        self.keys_seen += page.keys_seen;
        self.skipped_keys += page.skipped_keys;
        self.duplicate_keys += page.duplicate_keys;
        self.in_flight += page.in_flight;
        self.already_computed += page.already_computed;
        self.below_threshold += page.below_threshold;
        self.unreadable += page.unreadable;
        self.enqueued += page.enqueued;
        self.lapsed_leases += page.lapsed_leases;
    }
}

/// A candidate item inside one page: its id and store key.
type Candidate = (ItemId, String);

pub struct EligibilityScanner {
    store: Arc<dyn KeyedStore>,
    queue: Arc<dyn WorkQueue>,
    layout: KeyLayout,
    settings: ScannerSettings,
}

impl std::fmt::Debug for EligibilityScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EligibilityScanner")
            .field("pattern", &self.layout.scan_pattern())
            .field("settings", &self.settings)
            .finish()
    }
}

impl EligibilityScanner {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        queue: Arc<dyn WorkQueue>,
        layout: KeyLayout,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            store,
            queue,
            layout,
            settings,
        }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    pub async fn run_full_scan(&self) -> Result<ScanReport> {
        self.run_full_scan_until(&CancellationToken::new()).await
    }

    /// Full scan that stops at the next page boundary once `cancel` fires.
    pub async fn run_full_scan_until(&self, cancel: &CancellationToken) -> Result<ScanReport> {
        let started = Instant::now();
        let budget = self.settings.run_budget();
        let page_size = self.settings.page_size.max(1);
        let pattern = self.layout.scan_pattern();

        let mut report = ScanReport::default();
        let mut seen_cursors: HashSet<u64> = HashSet::new();
        let mut cursor = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled(format!(
                    "scan stopped after {} pages",
                    report.pages
                )));
            }
            let elapsed = started.elapsed();
            if report.pages > 0 && elapsed > budget {
                return Err(HarvestError::ScanBudgetExceeded { elapsed, budget });
            }

            let page = self.store.scan(cursor, page_size, &pattern).await?;
            report.pages += 1;

            if !page.is_last() && (page.cursor == cursor || !seen_cursors.insert(page.cursor)) {
                return Err(HarvestError::NonProgressingScan {
                    cursor: page.cursor,
                });
            }

            let page_report = self.process_page(&page.keys).await?;
            debug!(
                target: "harvest::scan",
                cursor,
                next = page.cursor,
                keys = page_report.keys_seen,
                enqueued = page_report.enqueued,
                "page processed"
            );
            report.absorb(&page_report);

            if page.is_last() {
                break;
            }
            cursor = page.cursor;
        }

        info!(
            target: "harvest::scan",
            pages = report.pages,
            keys = report.keys_seen,
            in_flight = report.in_flight,
            already_computed = report.already_computed,
            below_threshold = report.below_threshold,
            enqueued = report.enqueued,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "full scan complete"
        );
        Ok(report)
    }

    /// Applies the three filters to one page and enqueues the survivors.
    pub async fn process_page(&self, keys: &[String]) -> Result<ScanReport> {
        let mut report = ScanReport {
            keys_seen: keys.len() as u64,
            ..ScanReport::default()
        };

        let mut seen = HashSet::with_capacity(keys.len());
        let mut candidates: Vec<Candidate> = Vec::with_capacity(keys.len());
        for key in keys {
            match self.layout.parse_item_key(key) {
                Some(id) if seen.insert(id) => candidates.push((id, key.clone())),
                Some(_) => report.duplicate_keys += 1,
                None => {
                    debug!(target: "harvest::scan", key = %key, "skipping non-item key");
                    report.skipped_keys += 1;
                }
            }
        }

        let candidates = self.drop_in_flight(candidates, &mut report).await?;
        let candidates = self.drop_already_computed(candidates, &mut report).await?;
        let eligible = self.drop_below_threshold(candidates, &mut report).await?;

        if !eligible.is_empty() {
            let result_ttl = self.settings.result_ttl();
            let jobs: Vec<JobSpec> = eligible
                .iter()
                .map(|(id, _)| JobSpec::embedding(*id, result_ttl))
                .collect();
            report.enqueued = self.queue.enqueue_many(jobs).await? as u64;
        }

        Ok(report)
    }

    async fn drop_in_flight(
        &self,
        candidates: Vec<Candidate>,
        report: &mut ScanReport,
    ) -> Result<Vec<Candidate>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let job_keys: Vec<JobKey> = candidates
            .iter()
            .map(|(id, _)| JobKey::embedding(*id))
            .collect();
        let jobs = self.queue.fetch_jobs(&job_keys).await?;
        if jobs.len() != candidates.len() {
            return Err(HarvestError::QueueUnavailable(format!(
                "job lookup returned {} entries for {} keys",
                jobs.len(),
                candidates.len()
            )));
        }

        let now = Utc::now();
        Ok(candidates
            .into_iter()
            .zip(jobs)
            .filter_map(|(candidate, job)| match job {
                Some(job) if job.lease_lapsed(now) => {
                    debug!(target: "harvest::scan", job = %job.key, "embedding job lease lapsed");
                    report.lapsed_leases += 1;
                    Some(candidate)
                }
                Some(_) => {
                    report.in_flight += 1;
                    None
                }
                None => Some(candidate),
            })
            .collect())
    }

    async fn drop_already_computed(
        &self,
        candidates: Vec<Candidate>,
        report: &mut ScanReport,
    ) -> Result<Vec<Candidate>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let mut pipeline = StorePipeline::new();
        for (_, key) in &candidates {
            pipeline.hash_exists(key.as_str(), fields::EMBEDDINGS);
        }
        let replies = self.store.execute(pipeline).await?;
        check_reply_count(replies.len(), candidates.len())?;

        Ok(candidates
            .into_iter()
            .zip(replies)
            .filter_map(|(candidate, reply)| match reply.as_exists() {
                Some(true) => {
                    report.already_computed += 1;
                    None
                }
                Some(false) => Some(candidate),
                None => {
                    debug!(target: "harvest::scan", key = %candidate.1, ?reply, "unreadable HEXISTS reply");
                    report.unreadable += 1;
                    None
                }
            })
            .collect())
    }

    async fn drop_below_threshold(
        &self,
        candidates: Vec<Candidate>,
        report: &mut ScanReport,
    ) -> Result<Vec<Candidate>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let mut pipeline = StorePipeline::new();
        for (_, key) in &candidates {
            pipeline.hash_get(key.as_str(), fields::SCORE);
        }
        let replies = self.store.execute(pipeline).await?;
        check_reply_count(replies.len(), candidates.len())?;

        let threshold = self.settings.score_threshold;
        Ok(candidates
            .into_iter()
            .zip(replies)
            .filter_map(|(candidate, reply)| {
                match reply.as_text().map(|raw| raw.trim().parse::<i64>()) {
                    Some(Ok(score)) if score >= threshold => Some(candidate),
                    Some(Ok(_)) | None => {
                        report.below_threshold += 1;
                        None
                    }
                    Some(Err(_)) => {
                        debug!(target: "harvest::scan", key = %candidate.1, ?reply, "unparsable score");
                        report.unreadable += 1;
                        None
                    }
                }
            })
            .collect())
    }
}

fn check_reply_count(replies: usize, expected: usize) -> Result<()> {
    if replies == expected {
        Ok(())
    } else {
        Err(HarvestError::StoreUnavailable(format!(
            "pipeline returned {replies} replies for {expected} commands"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use harvester_model::JobKey;

    use super::*;
    use crate::queue::{InMemoryQueue, JobState};
    use crate::store::InMemoryStore;

    const LEASE: Duration = Duration::from_secs(600);

    fn scanner(store: &InMemoryStore, queue: &InMemoryQueue) -> EligibilityScanner {
        scanner_with(store, queue, ScannerSettings::default())
    }

    fn scanner_with(
        store: &InMemoryStore,
        queue: &InMemoryQueue,
        settings: ScannerSettings,
    ) -> EligibilityScanner {
        EligibilityScanner::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            KeyLayout::default(),
            settings,
        )
    }

    async fn seed(store: &InMemoryStore, id: u64, score: &str) {
        store
            .insert_hash(
                &format!("hn:{id}"),
                &[("by", "someone"), ("title", "t"), ("url", "https://x"), ("score", score)],
            )
            .await;
    }

    async fn queued_keys(queue: &InMemoryQueue) -> Vec<String> {
        queue
            .snapshot()
            .await
            .into_iter()
            .map(|job| job.key.into_string())
            .collect()
    }

    #[tokio::test]
    async fn high_score_item_gets_an_embedding_job() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 50, "150").await;

        let report = scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(report.enqueued, 1);
        assert_eq!(queued_keys(&queue).await, vec!["embedding_50".to_string()]);
        let job = &queue.snapshot().await[0];
        assert_eq!(job.result_ttl, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn low_score_and_unscored_items_are_ignored() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 51, "50").await;
        seed(&store, 52, "99").await;
        store.insert_hash("hn:53", &[("title", "no score")]).await;

        let report = scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(report.enqueued, 0);
        assert_eq!(report.below_threshold, 3);
        assert!(queue.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 60, "100").await;

        scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(queued_keys(&queue).await, vec!["embedding_60".to_string()]);
    }

    #[tokio::test]
    async fn items_with_embeddings_never_get_a_job() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 70, "500").await;
        store.insert_hash("hn:70", &[("embeddings", "blob")]).await;

        let report = scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(report.already_computed, 1);
        assert!(queue.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn existing_jobs_in_any_state_block_enqueue() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        for id in [80, 81, 82] {
            seed(&store, id, "300").await;
        }
        queue
            .enqueue_many(vec![
                JobSpec::embedding(ItemId(80), Duration::from_secs(60)),
                JobSpec::embedding(ItemId(81), Duration::from_secs(60)),
                JobSpec::embedding(ItemId(82), Duration::from_secs(60)),
            ])
            .await
            .expect("enqueue");
        let running = queue.dequeue(LEASE).await.expect("dequeue").expect("job 80");
        let failed = queue.dequeue(LEASE).await.expect("dequeue").expect("job 81");
        queue
            .fail(&failed.key, "embedder down", Duration::from_secs(3600))
            .await
            .expect("fail");
        assert_eq!(running.state, JobState::Running);

        let report = scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(report.in_flight, 3);
        assert_eq!(report.enqueued, 0);
    }

    #[tokio::test]
    async fn expired_job_records_no_longer_block() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 90, "300").await;
        queue
            .enqueue(JobSpec::embedding(ItemId(90), Duration::ZERO))
            .await
            .expect("enqueue");
        let job = queue.dequeue(LEASE).await.expect("dequeue").expect("job");
        queue.complete(&job.key, job.result_ttl).await.expect("complete");

        let report = scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(report.enqueued, 1);
    }

    #[tokio::test]
    async fn abandoned_running_job_is_enqueued_again() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 95, "300").await;
        queue
            .enqueue(JobSpec::embedding(ItemId(95), Duration::from_secs(10)))
            .await
            .expect("enqueue");
        queue
            .dequeue(Duration::ZERO)
            .await
            .expect("dequeue")
            .expect("job");

        let report = scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(report.lapsed_leases, 1);
        assert_eq!(report.in_flight, 0);
        assert_eq!(report.enqueued, 1);
        let job = queue.dequeue(LEASE).await.expect("dequeue").expect("fresh job");
        assert_eq!(job.key, JobKey::embedding(ItemId(95)));
        assert_eq!(job.attempts, 1);
        assert!(queue.dequeue(LEASE).await.expect("dequeue").is_none());
    }

    #[tokio::test]
    async fn repeated_scans_do_not_duplicate_jobs() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        for id in 1..=40 {
            seed(&store, id, if id % 2 == 0 { "200" } else { "5" }).await;
        }
        let scanner = scanner_with(
            &store,
            &queue,
            ScannerSettings {
                page_size: 7,
                ..ScannerSettings::default()
            },
        );

        let first = scanner.run_full_scan().await.expect("first scan");
        let second = scanner.run_full_scan().await.expect("second scan");

        assert_eq!(first.enqueued, 20);
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.in_flight, 20);
        assert_eq!(queue.snapshot().await.len(), 20);
    }

    #[tokio::test]
    async fn each_filter_stage_costs_one_round_trip_per_page() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        for id in 1..=10 {
            seed(&store, id, "150").await;
        }
        store.reset_round_trips();

        let report = scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(report.pages, 1);
        // scan + HEXISTS pipeline + HGET pipeline
        assert_eq!(store.round_trips(), 3);
        // fetch_jobs + enqueue_many
        assert_eq!(queue.round_trips(), 2);
    }

    #[tokio::test]
    async fn empty_stages_skip_their_round_trips() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 5, "150").await;
        store.insert_hash("hn:5", &[("embeddings", "blob")]).await;
        store.reset_round_trips();

        scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(store.round_trips(), 2);
        assert_eq!(queue.round_trips(), 1);
    }

    #[tokio::test]
    async fn stalled_cursor_aborts_with_non_progressing_scan() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        for id in 1..=30 {
            seed(&store, id, "1").await;
        }
        store.stall_cursor(10).await;
        let scanner = scanner_with(
            &store,
            &queue,
            ScannerSettings {
                page_size: 10,
                ..ScannerSettings::default()
            },
        );

        let err = scanner.run_full_scan().await.expect_err("cursor repeats");

        assert!(matches!(err, HarvestError::NonProgressingScan { cursor: 10 }));
    }

    #[tokio::test]
    async fn exhausted_budget_abandons_at_page_boundary() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        for id in 1..=30 {
            seed(&store, id, "150").await;
        }
        let scanner = scanner_with(
            &store,
            &queue,
            ScannerSettings {
                page_size: 10,
                run_budget_ms: 0,
                ..ScannerSettings::default()
            },
        );

        let err = scanner.run_full_scan().await.expect_err("budget is zero");

        assert!(matches!(err, HarvestError::ScanBudgetExceeded { .. }));
        // the first page was fully processed before the budget check
        assert_eq!(queue.snapshot().await.len(), 10);
    }

    #[tokio::test]
    async fn cancelled_scan_stops_before_the_next_page() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 1, "150").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = scanner(&store, &queue)
            .run_full_scan_until(&cancel)
            .await
            .expect_err("cancelled");

        assert!(matches!(err, HarvestError::Cancelled(_)));
        assert!(queue.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_keys_and_scores_are_skipped_per_item() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 1, "not-a-number").await;
        seed(&store, 2, "400").await;
        store.insert_hash("hn:latest", &[("score", "900")]).await;

        let report = scanner(&store, &queue).run_full_scan().await.expect("scan");

        assert_eq!(report.skipped_keys, 1);
        assert_eq!(report.unreadable, 1);
        assert_eq!(queued_keys(&queue).await, vec!["embedding_2".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_keys_within_a_page_are_enqueued_once() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 7, "400").await;

        let report = scanner(&store, &queue)
            .process_page(&["hn:7".to_string(), "hn:7".to_string()])
            .await
            .expect("page");

        assert_eq!(report.duplicate_keys, 1);
        assert_eq!(report.enqueued, 1);
        assert_eq!(
            queue.pending_keys().await,
            vec![JobKey::embedding(ItemId(7))]
        );
    }

    #[tokio::test]
    async fn store_outage_abandons_the_run() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        seed(&store, 1, "150").await;
        store.set_offline(true).await;

        let err = scanner(&store, &queue).run_full_scan().await.expect_err("store down");

        assert!(matches!(err, HarvestError::StoreUnavailable(_)));
    }
}
