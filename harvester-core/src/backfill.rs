//! Watermark driven backfill.
//!
//! Each run compares the persisted watermark with the feed's current max ID
//! and schedules one fetch job for every ID in between. The watermark only
//! moves past IDs whose jobs were accepted by the queue.

use std::sync::Arc;

use harvester_model::{ItemId, KeyLayout};
use tracing::{debug, info, warn};

use crate::config::BackfillSettings;
use crate::error::{HarvestError, Result};
use crate::feed::FeedClient;
use crate::queue::{JobSpec, WorkQueue};
use crate::store::KeyedStore;

/// Outcome of one backfill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub previous_watermark: ItemId,
    pub upstream_max: ItemId,
    pub enqueued: u64,
    pub watermark: ItemId,
}

pub struct BackfillController {
    feed: Arc<dyn FeedClient>,
    queue: Arc<dyn WorkQueue>,
    watermark_store: Arc<dyn KeyedStore>,
    layout: KeyLayout,
    settings: BackfillSettings,
}

impl std::fmt::Debug for BackfillController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackfillController")
            .field("watermark_key", &self.layout.watermark_key())
            .field("settings", &self.settings)
            .finish()
    }
}

impl BackfillController {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        queue: Arc<dyn WorkQueue>,
        watermark_store: Arc<dyn KeyedStore>,
        layout: KeyLayout,
        settings: BackfillSettings,
    ) -> Self {
        Self {
            feed,
            queue,
            watermark_store,
            layout,
            settings,
        }
    }

    pub fn settings(&self) -> &BackfillSettings {
        &self.settings
    }

    pub async fn read_watermark(&self) -> Result<ItemId> {
        let key = self.layout.watermark_key();
        match self.watermark_store.get(&key).await? {
            None => Ok(ItemId(self.settings.start_id)),
            Some(raw) => raw.parse().map_err(|_| HarvestError::CorruptState {
                key,
                reason: format!("watermark '{raw}' is not an item id"),
            }),
        }
    }

    async fn write_watermark(&self, id: ItemId) -> Result<()> {
        self.watermark_store
            .set(&self.layout.watermark_key(), &id.to_string())
            .await
    }

    pub async fn run_once(&self) -> Result<BackfillReport> {
        let upstream_max = self.feed.fetch_max_id().await?;
        let previous = self.read_watermark().await?;

        if upstream_max <= previous {
            debug!(
                target: "harvest::backfill",
                watermark = %previous,
                upstream_max = %upstream_max,
                "no new items"
            );
            return Ok(BackfillReport {
                previous_watermark: previous,
                upstream_max,
                enqueued: 0,
                watermark: previous,
            });
        }

        info!(
            target: "harvest::backfill",
            from = %previous.next(),
            to = %upstream_max,
            new_items = upstream_max.get() - previous.get(),
            "new items available; enqueueing fetch jobs"
        );

        let chunk = self.settings.enqueue_chunk.max(1) as u64;
        let result_ttl = self.settings.result_ttl();
        let mut committed = previous;
        let mut enqueued = 0u64;

        while committed < upstream_max {
            let start = committed.next().get();
            let end = start.saturating_add(chunk - 1).min(upstream_max.get());
            let jobs: Vec<JobSpec> = (start..=end)
                .map(|id| JobSpec::fetch(ItemId(id), result_ttl))
                .collect();

            if let Err(err) = self.queue.enqueue_many(jobs).await {
                if committed > previous {
                    match self.write_watermark(committed).await {
                        Ok(()) => warn!(
                            target: "harvest::backfill",
                            watermark = %committed,
                            "enqueue failed mid-run; watermark checkpointed"
                        ),
                        Err(checkpoint_err) => warn!(
                            target: "harvest::backfill",
                            "watermark checkpoint failed: {checkpoint_err}"
                        ),
                    }
                }
                return Err(err);
            }

            enqueued += end - start + 1;
            committed = ItemId(end);
        }

        self.write_watermark(upstream_max).await?;

        info!(
            target: "harvest::backfill",
            enqueued,
            watermark = %upstream_max,
            "backfill run complete"
        );

        Ok(BackfillReport {
            previous_watermark: previous,
            upstream_max,
            enqueued,
            watermark: upstream_max,
        })
    }
}
