use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::{HarvestError, Result};

/// Opens a managed connection. The manager reconnects on its own after a
/// dropped link, so callers hold one per database and clone it freely.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    info!("Connecting to Redis at {}", redact(redis_url));

    let client = redis::Client::open(redis_url).map_err(|e| {
        HarvestError::StoreUnavailable(format!("Failed to create Redis client: {e}"))
    })?;

    let conn = ConnectionManager::new(client)
        .await
        .map_err(|e| HarvestError::StoreUnavailable(format!("Failed to connect to Redis: {e}")))?;

    info!("Successfully connected to Redis");
    Ok(conn)
}

/// Runs one Redis call under `timeout`, mapping both failure modes through
/// `wrap` so store and queue errors stay distinguishable.
pub(crate) async fn bounded<T, F>(
    timeout: Duration,
    op: &'static str,
    wrap: fn(String) -> HarvestError,
    fut: F,
) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(wrap(format!("Redis {op} failed: {e}"))),
        Err(_) => Err(wrap(format!("Redis {op} timed out after {timeout:?}"))),
    }
}

/// Strips credentials from a connection URL before it reaches the logs.
fn redact(redis_url: &str) -> String {
    match url::Url::parse(redis_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable url>".to_string(),
    }
}
