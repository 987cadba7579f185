use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{KeyedStore, PipelineCommand, PipelineReply, ScanPage, StorePipeline, glob_matches};
use crate::error::{HarvestError, Result};

#[derive(Debug, Default)]
struct StoreState {
    strings: BTreeMap<String, String>,
    hashes: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    /// Cursors handed out by `scan` that should instead repeat themselves.
    stuck_cursors: Vec<u64>,
    offline: bool,
}

/// In-process [`KeyedStore`] used by tests and local dry runs.
///
/// Cursors are offsets into the sorted key space, so keys inserted during a
/// scan can shift pages the same way a rehash does in Redis. Every trait
/// call counts as one round trip.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    round_trips: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn reset_round_trips(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
    }

    /// Seeds a hash from text fields.
    pub async fn insert_hash(&self, key: &str, fields: &[(&str, &str)]) {
        let mut state = self.state.lock().await;
        let entry = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert((*field).to_string(), value.as_bytes().to_vec());
        }
    }

    pub async fn field(&self, key: &str, field: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state.hashes.get(key).and_then(|hash| hash.get(field).cloned())
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        let state = self.state.lock().await;
        state.hashes.contains_key(key) || state.strings.contains_key(key)
    }

    /// Makes `scan` answer `cursor` with `cursor` again, reproducing a
    /// server whose cursor never advances.
    pub async fn stall_cursor(&self, cursor: u64) {
        self.state.lock().await.stuck_cursors.push(cursor);
    }

    /// Every subsequent call fails with [`HarvestError::StoreUnavailable`].
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, StoreState>> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        if state.offline {
            return Err(HarvestError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ));
        }
        Ok(state)
    }
}

#[async_trait]
impl KeyedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.lock().await?;
        Ok(state.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock().await?;
        state.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let state = self.lock().await?;
        let hash = state.hashes.get(key);
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|h| h.get(*field).cloned()))
            .collect())
    }

    async fn hash_set(&self, key: &str, mapping: &[(&str, Vec<u8>)]) -> Result<()> {
        let mut state = self.lock().await?;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in mapping {
            hash.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        let state = self.lock().await?;
        Ok(state
            .hashes
            .get(key)
            .is_some_and(|hash| hash.contains_key(field)))
    }

    async fn scan(&self, cursor: u64, page_size: usize, pattern: &str) -> Result<ScanPage> {
        let state = self.lock().await?;

        let keys: Vec<&String> = state
            .hashes
            .keys()
            .chain(state.strings.keys())
            .filter(|key| glob_matches(pattern, key))
            .collect();

        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(keys.len());
        let end = start.saturating_add(page_size.max(1)).min(keys.len());
        let page: Vec<String> = keys[start..end].iter().map(|k| (*k).clone()).collect();

        if state.stuck_cursors.contains(&cursor) {
            return Ok(ScanPage { cursor, keys: page });
        }

        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok(ScanPage { cursor: next, keys: page })
    }

    async fn execute(&self, pipeline: StorePipeline) -> Result<Vec<PipelineReply>> {
        let state = self.lock().await?;
        Ok(pipeline
            .into_commands()
            .into_iter()
            .map(|command| match command {
                PipelineCommand::HashExists { key, field } => PipelineReply::Exists(
                    state
                        .hashes
                        .get(&key)
                        .is_some_and(|hash| hash.contains_key(&field)),
                ),
                PipelineCommand::HashGet { key, field } => PipelineReply::Value(
                    state.hashes.get(&key).and_then(|hash| hash.get(&field).cloned()),
                ),
            })
            .collect())
    }
}
