//! Upstream item feed.

mod http;

pub use http::HackerNewsClient;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use harvester_model::{FeedItem, ItemId};
use tokio::sync::Mutex;

use crate::error::{HarvestError, Result};

#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetches one item. `Ok(None)` means the feed answered but has no
    /// such item.
    async fn fetch_item(&self, id: ItemId) -> Result<Option<FeedItem>>;

    /// Highest item ID the feed has handed out so far.
    async fn fetch_max_id(&self) -> Result<ItemId>;
}

/// Scripted [`FeedClient`] for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFeed {
    items: Arc<Mutex<HashMap<ItemId, FeedItem>>>,
    max_id: Arc<AtomicU64>,
    unavailable: Arc<Mutex<bool>>,
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an item and bumps the max ID if needed.
    pub async fn publish(&self, item: FeedItem) {
        self.max_id.fetch_max(item.id.get(), Ordering::SeqCst);
        self.items.lock().await.insert(item.id, item);
    }

    pub fn set_max_id(&self, id: ItemId) {
        self.max_id.store(id.get(), Ordering::SeqCst);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().await = unavailable;
    }

    async fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock().await {
            return Err(HarvestError::UpstreamUnavailable(
                "scripted feed outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedClient for InMemoryFeed {
    async fn fetch_item(&self, id: ItemId) -> Result<Option<FeedItem>> {
        self.check_available().await?;
        Ok(self.items.lock().await.get(&id).cloned())
    }

    async fn fetch_max_id(&self) -> Result<ItemId> {
        self.check_available().await?;
        Ok(ItemId(self.max_id.load(Ordering::SeqCst)))
    }
}
