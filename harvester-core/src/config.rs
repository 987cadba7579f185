use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global knobs for the ingestion pipeline.
///
/// All fields carry defaults so a deployment only has to spell out what it
/// wants to change.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterSettings {
    /// Store key prefix for items (`<prefix>:<id>`) and the watermark
    /// (`max:ID:<prefix>`).
    pub feed_prefix: String,
    pub feed: FeedSettings,
    pub backfill: BackfillSettings,
    pub scanner: ScannerSettings,
    pub worker: WorkerSettings,
}

impl Default for HarvesterSettings {
    fn default() -> Self {
        Self {
            feed_prefix: "hn".to_string(),
            feed: FeedSettings::default(),
            backfill: BackfillSettings::default(),
            scanner: ScannerSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

/// Upstream HTTP client tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Total attempts per request, including the first one.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: "https://hacker-news.firebaseio.com".to_string(),
            request_timeout_ms: 10_000,
            retry_attempts: 10,
            retry_delay_ms: 1_000,
        }
    }
}

impl FeedSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillSettings {
    /// Delay between the end of one run and the start of the next.
    pub interval_ms: u64,
    /// Watermark assumed when none has been persisted yet.
    pub start_id: u64,
    /// IDs per `enqueue_many` round trip.
    pub enqueue_chunk: usize,
    /// How long finished fetch jobs stay visible in the queue.
    pub result_ttl_secs: u64,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            start_id: 0,
            enqueue_chunk: 1_000,
            result_ttl_secs: 500,
        }
    }
}

impl BackfillSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    pub interval_ms: u64,
    /// `COUNT` hint passed to every scan page.
    pub page_size: usize,
    /// Minimum score an item needs before an embedding is worth computing.
    pub score_threshold: i64,
    /// Embedding job results are fire-and-forget; keep them only briefly.
    pub result_ttl_secs: u64,
    /// A full scan running longer than this is abandoned at the next page
    /// boundary.
    pub run_budget_ms: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            page_size: 10_000,
            score_threshold: 100,
            result_ttl_secs: 10,
            run_budget_ms: 600_000,
        }
    }
}

impl ScannerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_millis(self.run_budget_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// How long failed job records are retained. While retained they keep
    /// the scanner from re-enqueueing the same embedding.
    pub failure_ttl_secs: u64,
    /// A dequeued job that is neither completed nor failed within this window
    /// goes back to the pending list.
    pub lease_ttl_ms: u64,
    /// Runs per job, counting lease expiries, before a transient failure
    /// becomes permanent.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles on every further attempt.
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1_000,
            failure_ttl_secs: 7 * 24 * 60 * 60,
            lease_ttl_ms: 10 * 60 * 1_000,
            max_attempts: 5,
            retry_base_delay_ms: 30_000,
            retry_max_delay_ms: 30 * 60 * 1_000,
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    /// Backoff before running a job again after its `attempt`-th run failed.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let scaled = self.retry_base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(scaled.min(self.retry_max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_up_to_the_cap() {
        let settings = WorkerSettings {
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 5_000,
            ..WorkerSettings::default()
        };

        assert_eq!(settings.retry_delay(1), Duration::from_secs(1));
        assert_eq!(settings.retry_delay(2), Duration::from_secs(2));
        assert_eq!(settings.retry_delay(3), Duration::from_secs(4));
        assert_eq!(settings.retry_delay(4), Duration::from_secs(5));
        assert_eq!(settings.retry_delay(u32::MAX), Duration::from_secs(5));
    }
}
