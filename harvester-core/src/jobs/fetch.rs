use std::sync::Arc;

use harvester_model::{ItemId, KeyLayout, StoredItem};
use tracing::debug;

use crate::error::{HarvestError, Result};
use crate::feed::FeedClient;
use crate::store::KeyedStore;

/// Fetches one item from the feed and writes its record.
///
/// Items the pipeline does not track come back as
/// [`HarvestError::MalformedItem`] and are never written. Re-fetching an item
/// refreshes its mutable fields and keeps any embedding already stored.
#[derive(Clone)]
pub struct FetchItemJob {
    feed: Arc<dyn FeedClient>,
    store: Arc<dyn KeyedStore>,
    layout: KeyLayout,
}

impl std::fmt::Debug for FetchItemJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchItemJob")
            .field("prefix", &self.layout.prefix())
            .finish_non_exhaustive()
    }
}

impl FetchItemJob {
    pub fn new(feed: Arc<dyn FeedClient>, store: Arc<dyn KeyedStore>, layout: KeyLayout) -> Self {
        Self {
            feed,
            store,
            layout,
        }
    }

    pub async fn run(&self, id: ItemId) -> Result<StoredItem> {
        let item = self
            .feed
            .fetch_item(id)
            .await?
            .ok_or_else(|| HarvestError::MalformedItem {
                id,
                reason: "feed has no such item".to_string(),
            })?;

        let stored = StoredItem::from_feed(item).map_err(|rejection| {
            debug!(target: "harvest::worker", item = %id, %rejection, "discarding item");
            HarvestError::MalformedItem {
                id,
                reason: rejection.to_string(),
            }
        })?;

        let mapping: Vec<(&str, Vec<u8>)> = stored
            .to_fields()
            .into_iter()
            .map(|(field, value)| (field, value.into_bytes()))
            .collect();
        self.store
            .hash_set(&self.layout.item_key(id), &mapping)
            .await?;

        debug!(target: "harvest::worker", item = %id, score = stored.score, "stored item");
        Ok(stored)
    }
}
