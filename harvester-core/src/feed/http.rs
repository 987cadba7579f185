use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use harvester_model::{FeedItem, ItemId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::FeedClient;
use crate::config::FeedSettings;
use crate::error::{HarvestError, Result};

/// HTTP client for the Hacker News Firebase API.
///
/// Every request is retried with a fixed delay. Transport errors, non-2xx
/// statuses and undecodable bodies all count as a failed attempt.
#[derive(Clone)]
pub struct HackerNewsClient {
    http: Client,
    base_url: Url,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl fmt::Debug for HackerNewsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HackerNewsClient")
            .field("base_url", &self.base_url.as_str())
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl HackerNewsClient {
    pub fn new(settings: &FeedSettings) -> Result<Self> {
        let mut base_url = Url::parse(&settings.base_url).map_err(|e| {
            HarvestError::Internal(format!("Invalid feed base URL '{}': {e}", settings.base_url))
        })?;
        // `join` replaces the last segment unless the base ends in a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HarvestError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            retry_attempts: settings.retry_attempts.max(1),
            retry_delay: settings.retry_delay(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| HarvestError::Internal(format!("Invalid feed path '{path}': {e}")))
    }

    pub fn item_url(&self, id: ItemId) -> Result<Url> {
        self.endpoint(&format!("v0/item/{id}.json"))
    }

    pub fn max_item_url(&self) -> Result<Url> {
        self.endpoint("v0/maxitem.json")
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &Url) -> std::result::Result<T, String> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected status {status}"));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| format!("undecodable body: {e}"))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry_attempts {
            match self.get_once(&url).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        "Feed request retrying (attempt {}/{}): url={}, err={}",
                        attempt, self.retry_attempts, url, err
                    );
                    last_error = err;
                }
            }
            if attempt < self.retry_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(HarvestError::UpstreamUnavailable(format!(
            "{url} failed after {} attempts: {last_error}",
            self.retry_attempts
        )))
    }
}

#[async_trait]
impl FeedClient for HackerNewsClient {
    async fn fetch_item(&self, id: ItemId) -> Result<Option<FeedItem>> {
        debug!("Fetching item {}", id);
        self.get_json::<Option<FeedItem>>(self.item_url(id)?).await
    }

    async fn fetch_max_id(&self) -> Result<ItemId> {
        self.get_json::<u64>(self.max_item_url()?)
            .await
            .map(ItemId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_built_under_the_base_url() {
        let client = HackerNewsClient::new(&FeedSettings::default()).expect("client");
        assert_eq!(
            client.item_url(ItemId(8863)).expect("item url").as_str(),
            "https://hacker-news.firebaseio.com/v0/item/8863.json"
        );
        assert_eq!(
            client.max_item_url().expect("max url").as_str(),
            "https://hacker-news.firebaseio.com/v0/maxitem.json"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let settings = FeedSettings {
            base_url: "not a url".into(),
            ..FeedSettings::default()
        };
        assert!(HackerNewsClient::new(&settings).is_err());
    }

    #[tokio::test]
    async fn unreachable_feed_reports_upstream_unavailable() {
        let settings = FeedSettings {
            base_url: "http://127.0.0.1:9".into(),
            request_timeout_ms: 200,
            retry_attempts: 2,
            retry_delay_ms: 10,
        };
        let client = HackerNewsClient::new(&settings).expect("client");

        let err = client.fetch_max_id().await.expect_err("nothing listens on port 9");
        assert!(matches!(err, HarvestError::UpstreamUnavailable(msg) if msg.contains("2 attempts")));
    }
}
