use thiserror::Error;

use super::models::{Config, RedisConfig};

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroNotAllowed { field: &'static str },
    #[error("feed prefix '{prefix}' must be non-empty and free of ':' and glob characters")]
    InvalidFeedPrefix { prefix: String },
    #[error("redis {role} URL is invalid: {reason}")]
    InvalidRedisUrl { role: &'static str, reason: String },
    #[error("feed base URL '{url}' is invalid")]
    InvalidFeedUrl { url: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let settings = &config.harvester;

    validate_prefix(&settings.feed_prefix)?;
    validate_redis_url("queue", &config.redis.queue_url)?;
    validate_redis_url("store", &config.redis.store_url)?;
    if url::Url::parse(&settings.feed.base_url).is_err() {
        return Err(ConfigGuardRailError::InvalidFeedUrl {
            url: settings.feed.base_url.clone(),
        });
    }

    for (field, value) in [
        ("scanner.page_size", settings.scanner.page_size),
        ("backfill.enqueue_chunk", settings.backfill.enqueue_chunk),
        ("worker.concurrency", settings.worker.concurrency),
        ("feed.retry_attempts", settings.feed.retry_attempts as usize),
        ("worker.max_attempts", settings.worker.max_attempts as usize),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroNotAllowed { field });
        }
    }
    if config.redis.response_timeout.is_zero() {
        return Err(ConfigGuardRailError::ZeroNotAllowed {
            field: "redis.response_timeout",
        });
    }
    if settings.worker.lease_ttl_ms == 0 {
        return Err(ConfigGuardRailError::ZeroNotAllowed {
            field: "worker.lease_ttl",
        });
    }

    let attempts = settings.feed.retry_attempts;
    let slowest_fetch = settings.feed.request_timeout() * attempts
        + settings.feed.retry_delay() * attempts.saturating_sub(1);
    if settings.worker.lease_ttl() < slowest_fetch {
        warnings.push_with_hint(
            format!(
                "worker.lease_ttl ({:?}) is shorter than a fetch that exhausts its feed retries ({:?})",
                settings.worker.lease_ttl(),
                slowest_fetch
            ),
            "Slow fetches lose their lease and run twice; raise worker.lease_ttl",
        );
    }

    if settings.worker.failure_ttl_secs == 0 {
        warnings.push_with_hint(
            "worker.failure_ttl is zero; items whose embedding fails are retried on every scan",
            "Keep failed records for a while (default 7days) so the scanner skips them",
        );
    }
    if settings.scanner.run_budget_ms == 0 {
        warnings.push_with_hint(
            "scanner.run_budget is zero; every scan stops after its first page",
            "Set scanner.run_budget to a duration longer than one page takes",
        );
    }
    if settings.scanner.score_threshold <= 0 {
        warnings.push(format!(
            "scanner.score_threshold is {}; every stored item qualifies for an embedding",
            settings.scanner.score_threshold
        ));
    }
    if config.redis.queue_url == RedisConfig::DEFAULT_URL && config.redis.shares_database() {
        warnings.push_with_hint(
            "Using the default local Redis for both queue and item store",
            "Set REDIS_QUEUE_URL and REDIS_STORE_URL (or REDIS_URL) for deployments",
        );
    }

    Ok(warnings)
}

fn validate_prefix(prefix: &str) -> Result<(), ConfigGuardRailError> {
    let bad = prefix.is_empty()
        || prefix
            .chars()
            .any(|c| matches!(c, ':' | '*' | '?' | '[' | ']' | '\\') || c.is_whitespace());
    if bad {
        return Err(ConfigGuardRailError::InvalidFeedPrefix {
            prefix: prefix.to_string(),
        });
    }
    Ok(())
}

fn validate_redis_url(role: &'static str, raw: &str) -> Result<(), ConfigGuardRailError> {
    let parsed = url::Url::parse(raw).map_err(|err| ConfigGuardRailError::InvalidRedisUrl {
        role,
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => Ok(()),
        other => Err(ConfigGuardRailError::InvalidRedisUrl {
            role,
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
