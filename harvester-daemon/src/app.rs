use std::sync::Arc;

use anyhow::Context;
use harvester_config::Config;
use harvester_core::{
    BackfillController, EligibilityScanner,
    embedder::ZeroEmbedder,
    feed::HackerNewsClient,
    jobs::{ComputeEmbeddingJob, FetchItemJob, HarvestDispatcher},
    queue::RedisJobQueue,
    redis_io,
    runtime::HarvesterRuntime,
    store::RedisStore,
};
use harvester_model::KeyLayout;
use tracing::info;

/// Every long-lived component, wired against Redis and the live feed.
pub struct App {
    pub backfill: Arc<BackfillController>,
    pub scanner: Arc<EligibilityScanner>,
    pub queue: Arc<RedisJobQueue>,
    pub dispatcher: Arc<HarvestDispatcher>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("backfill", &self.backfill)
            .field("scanner", &self.scanner)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl App {
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let settings = &config.harvester;
        let timeout = config.redis.response_timeout;
        let layout = KeyLayout::new(settings.feed_prefix.clone());

        let queue_conn = redis_io::connect(&config.redis.queue_url)
            .await
            .context("failed to connect to the queue Redis")?;
        let queue = Arc::new(RedisJobQueue::from_manager(
            queue_conn.clone(),
            &config.redis.namespace,
            timeout,
        ));
        // The watermark lives next to the queue, not with the items.
        let watermark_store = Arc::new(RedisStore::from_manager(queue_conn, timeout));

        let item_store = if config.redis.shares_database() {
            Arc::clone(&watermark_store)
        } else {
            Arc::new(
                RedisStore::connect(&config.redis.store_url, timeout)
                    .await
                    .context("failed to connect to the item store Redis")?,
            )
        };

        let feed = Arc::new(
            HackerNewsClient::new(&settings.feed).context("failed to build the feed client")?,
        );

        let backfill = Arc::new(BackfillController::new(
            feed.clone(),
            queue.clone(),
            watermark_store,
            layout.clone(),
            settings.backfill,
        ));
        let scanner = Arc::new(EligibilityScanner::new(
            item_store.clone(),
            queue.clone(),
            layout.clone(),
            settings.scanner,
        ));
        let dispatcher = Arc::new(HarvestDispatcher::new(
            FetchItemJob::new(feed, item_store.clone(), layout.clone()),
            ComputeEmbeddingJob::new(item_store, Arc::new(ZeroEmbedder), layout),
        ));

        info!(
            prefix = %settings.feed_prefix,
            namespace = %config.redis.namespace,
            shared_database = config.redis.shares_database(),
            "harvester components ready"
        );

        Ok(Self {
            backfill,
            scanner,
            queue,
            dispatcher,
        })
    }

    pub fn runtime(&self, config: &Config) -> HarvesterRuntime {
        HarvesterRuntime::new(
            Arc::clone(&self.backfill),
            Arc::clone(&self.scanner),
            self.queue.clone(),
            self.dispatcher.clone(),
            config.harvester.worker,
        )
    }
}
