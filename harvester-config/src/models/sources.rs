use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::string_var;

/// Raw configuration as defined in a TOML file.
///
/// Durations are humantime strings (`"10s"`, `"7days"`).
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub redis: FileRedisConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_prefix: Option<String>,
    #[serde(default)]
    pub feed: FileFeedConfig,
    #[serde(default)]
    pub backfill: FileBackfillConfig,
    #[serde(default)]
    pub scanner: FileScannerConfig,
    #[serde(default)]
    pub worker: FileWorkerConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    /// Fallback for both `queue_url` and `store_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFeedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBackfillConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enqueue_chunk: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ttl: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileScannerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_budget: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWorkerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_base_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_max_delay: Option<String>,
}

/// Environment overrides. Values stay raw here; the loader parses them so a
/// bad value is reported against its variable name.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,

    pub redis_url: Option<String>,
    pub redis_queue_url: Option<String>,
    pub redis_store_url: Option<String>,
    pub redis_password: Option<String>,
    pub redis_password_file: Option<PathBuf>,
    pub redis_response_timeout: Option<String>,
    pub queue_namespace: Option<String>,

    pub feed_prefix: Option<String>,
    pub feed_base_url: Option<String>,
    pub feed_request_timeout: Option<String>,
    pub feed_retry_attempts: Option<String>,
    pub feed_retry_delay: Option<String>,

    pub backfill_interval: Option<String>,
    pub backfill_start_id: Option<String>,
    pub backfill_enqueue_chunk: Option<String>,
    pub backfill_result_ttl: Option<String>,

    pub scan_interval: Option<String>,
    pub scan_page_size: Option<String>,
    pub scan_score_threshold: Option<String>,
    pub scan_result_ttl: Option<String>,
    pub scan_run_budget: Option<String>,

    pub worker_concurrency: Option<String>,
    pub worker_poll_interval: Option<String>,
    pub worker_failure_ttl: Option<String>,
    pub worker_lease_ttl: Option<String>,
    pub worker_max_attempts: Option<String>,
    pub worker_retry_base_delay: Option<String>,
    pub worker_retry_max_delay: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: string_var("HARVESTER_CONFIG").map(PathBuf::from),

            redis_url: string_var("REDIS_URL"),
            redis_queue_url: string_var("REDIS_QUEUE_URL"),
            redis_store_url: string_var("REDIS_STORE_URL"),
            redis_password: string_var("REDIS_PASSWORD"),
            redis_password_file: string_var("REDIS_PASSWORD_FILE").map(PathBuf::from),
            redis_response_timeout: string_var("REDIS_RESPONSE_TIMEOUT"),
            queue_namespace: string_var("HARVESTER_QUEUE_NAMESPACE"),

            feed_prefix: string_var("HARVESTER_FEED_PREFIX"),
            feed_base_url: string_var("HN_API_URL"),
            feed_request_timeout: string_var("HN_REQUEST_TIMEOUT"),
            feed_retry_attempts: string_var("HN_RETRY_ATTEMPTS"),
            feed_retry_delay: string_var("HN_RETRY_DELAY"),

            backfill_interval: string_var("BACKFILL_INTERVAL"),
            backfill_start_id: string_var("BACKFILL_START_ID"),
            backfill_enqueue_chunk: string_var("BACKFILL_ENQUEUE_CHUNK"),
            backfill_result_ttl: string_var("BACKFILL_RESULT_TTL"),

            scan_interval: string_var("SCAN_INTERVAL"),
            scan_page_size: string_var("SCAN_PAGE_SIZE"),
            scan_score_threshold: string_var("SCAN_SCORE_THRESHOLD"),
            scan_result_ttl: string_var("SCAN_RESULT_TTL"),
            scan_run_budget: string_var("SCAN_RUN_BUDGET"),

            worker_concurrency: string_var("WORKER_CONCURRENCY"),
            worker_poll_interval: string_var("WORKER_POLL_INTERVAL"),
            worker_failure_ttl: string_var("WORKER_FAILURE_TTL"),
            worker_lease_ttl: string_var("WORKER_LEASE_TTL"),
            worker_max_attempts: string_var("WORKER_MAX_ATTEMPTS"),
            worker_retry_base_delay: string_var("WORKER_RETRY_BASE_DELAY"),
            worker_retry_max_delay: string_var("WORKER_RETRY_MAX_DELAY"),
        }
    }
}
