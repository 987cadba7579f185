use async_trait::async_trait;
use harvester_model::{DIMENSIONS, Embedding};

use crate::error::Result;

/// Computes an embedding for the document behind a URL.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn compute_embedding(&self, url: &str) -> Result<Embedding>;

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }
}

/// Returns an all-zero vector for every document. Stands in until a real
/// model backend is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroEmbedder;

#[async_trait]
impl Embedder for ZeroEmbedder {
    async fn compute_embedding(&self, _url: &str) -> Result<Embedding> {
        Ok(Embedding::zeros(self.dimensions()))
    }
}
