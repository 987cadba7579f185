pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use harvester_core::config::HarvesterSettings;

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub harvester: HarvesterSettings,
    pub metadata: ConfigMetadata,
}

/// Connection settings for the two Redis roles. Both URLs may name the same
/// server and database.
#[derive(Clone)]
pub struct RedisConfig {
    /// Job queue and the backfill watermark.
    pub queue_url: String,
    /// Item hashes scanned for eligibility.
    pub store_url: String,
    /// Upper bound on every single Redis command.
    pub response_timeout: Duration,
    /// Key namespace for job records and the pending list.
    pub namespace: String,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("queue_url", &redact(&self.queue_url))
            .field("store_url", &redact(&self.store_url))
            .field("response_timeout", &self.response_timeout)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl RedisConfig {
    pub const DEFAULT_URL: &'static str = "redis://127.0.0.1:6379/0";
    pub const DEFAULT_NAMESPACE: &'static str = "harvester";
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn shares_database(&self) -> bool {
        self.queue_url == self.store_url
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

fn redact(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}
