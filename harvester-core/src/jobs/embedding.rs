use std::sync::Arc;

use harvester_model::{ItemId, KeyLayout, fields};
use tracing::debug;

use crate::codec::encode_embedding;
use crate::embedder::Embedder;
use crate::error::{HarvestError, Result};
use crate::store::KeyedStore;

/// What an embedding job did for its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingOutcome {
    Written { dimensions: usize },
    /// Another job got there first.
    AlreadyPresent,
}

#[derive(Clone)]
pub struct ComputeEmbeddingJob {
    store: Arc<dyn KeyedStore>,
    embedder: Arc<dyn Embedder>,
    layout: KeyLayout,
}

impl std::fmt::Debug for ComputeEmbeddingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeEmbeddingJob")
            .field("prefix", &self.layout.prefix())
            .field("dimensions", &self.embedder.dimensions())
            .finish_non_exhaustive()
    }
}

impl ComputeEmbeddingJob {
    pub fn new(store: Arc<dyn KeyedStore>, embedder: Arc<dyn Embedder>, layout: KeyLayout) -> Self {
        Self {
            store,
            embedder,
            layout,
        }
    }

    pub async fn run(&self, id: ItemId) -> Result<EmbeddingOutcome> {
        let key = self.layout.item_key(id);
        let values = self
            .store
            .hash_get(&key, &[fields::URL, fields::TITLE, fields::EMBEDDINGS])
            .await?;
        let [url, title, embeddings] = <[Option<Vec<u8>>; 3]>::try_from(values).map_err(|v| {
            HarvestError::StoreUnavailable(format!("expected 3 hash values, got {}", v.len()))
        })?;

        if embeddings.is_some() {
            return Ok(EmbeddingOutcome::AlreadyPresent);
        }
        if url.is_none() && title.is_none() {
            return Err(HarvestError::MalformedItem {
                id,
                reason: "no stored record".to_string(),
            });
        }

        let url = url
            .map(|raw| String::from_utf8_lossy(&raw).trim().to_string())
            .unwrap_or_default();
        if url.is_empty() {
            return Err(HarvestError::MalformedItem {
                id,
                reason: "item has no url to embed".to_string(),
            });
        }

        let embedding = self.embedder.compute_embedding(&url).await?;
        let expected = self.embedder.dimensions();
        if embedding.dimensions() != expected {
            return Err(HarvestError::Embedding(format!(
                "embedder returned {} dimensions, expected {expected}",
                embedding.dimensions()
            )));
        }

        let encoded = encode_embedding(&embedding)?;
        self.store
            .hash_set(&key, &[(fields::EMBEDDINGS, encoded)])
            .await?;

        debug!(target: "harvest::worker", item = %id, dimensions = expected, "stored embedding");
        Ok(EmbeddingOutcome::Written {
            dimensions: expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use harvester_model::{DIMENSIONS, Embedding};

    use super::*;
    use crate::codec::decode_embedding;
    use crate::embedder::ZeroEmbedder;
    use crate::store::InMemoryStore;

    fn job(store: &InMemoryStore, embedder: Arc<dyn Embedder>) -> ComputeEmbeddingJob {
        ComputeEmbeddingJob::new(Arc::new(store.clone()), embedder, KeyLayout::default())
    }

    #[tokio::test]
    async fn writes_a_decodable_compressed_vector() {
        let store = InMemoryStore::new();
        store
            .insert_hash("hn:50", &[("title", "t"), ("url", "https://example.com")])
            .await;

        let outcome = job(&store, Arc::new(ZeroEmbedder))
            .run(ItemId(50))
            .await
            .expect("embed");

        assert_eq!(outcome, EmbeddingOutcome::Written { dimensions: DIMENSIONS });
        let blob = store.field("hn:50", "embeddings").await.expect("blob written");
        assert_eq!(decode_embedding(&blob).expect("decode"), Embedding::zeros(DIMENSIONS));
    }

    #[tokio::test]
    async fn empty_url_is_malformed() {
        let store = InMemoryStore::new();
        store.insert_hash("hn:51", &[("title", "Ask HN"), ("url", "")]).await;

        let err = job(&store, Arc::new(ZeroEmbedder))
            .run(ItemId(51))
            .await
            .expect_err("nothing to embed");

        assert!(matches!(err, HarvestError::MalformedItem { .. }));
        assert_eq!(store.field("hn:51", "embeddings").await, None);
    }

    #[tokio::test]
    async fn existing_embedding_is_left_alone() {
        let store = InMemoryStore::new();
        store
            .insert_hash("hn:52", &[("url", "https://x"), ("embeddings", "keep")])
            .await;

        let outcome = job(&store, Arc::new(ZeroEmbedder))
            .run(ItemId(52))
            .await
            .expect("embed");

        assert_eq!(outcome, EmbeddingOutcome::AlreadyPresent);
        assert_eq!(store.field("hn:52", "embeddings").await, Some(b"keep".to_vec()));
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        async fn compute_embedding(&self, _url: &str) -> Result<Embedding> {
            Ok(Embedding::zeros(3))
        }
    }

    #[tokio::test]
    async fn wrong_dimensionality_is_rejected() {
        let store = InMemoryStore::new();
        store.insert_hash("hn:53", &[("url", "https://x")]).await;

        let err = job(&store, Arc::new(ShortEmbedder))
            .run(ItemId(53))
            .await
            .expect_err("3 != 1536");

        assert!(matches!(err, HarvestError::Embedding(_)));
    }
}
