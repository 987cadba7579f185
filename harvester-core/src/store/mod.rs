//! Keyed store port.
//!
//! Item records are hashes under `<prefix>:<id>`. The watermark is a plain
//! string key. Anything that speaks this trait can back the pipeline; the
//! production implementation is [`RedisStore`], tests use [`InMemoryStore`].

mod memory;
mod redis;

pub use memory::InMemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;

use crate::error::Result;

/// One page of a cursor scan. A returned cursor of `0` ends the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.cursor == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineCommand {
    HashExists { key: String, field: String },
    HashGet { key: String, field: String },
}

/// Batch of read commands sent in one round trip. Replies come back in
/// submission order.
#[derive(Debug, Clone, Default)]
pub struct StorePipeline {
    commands: Vec<PipelineCommand>,
}

impl StorePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_exists(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.commands.push(PipelineCommand::HashExists {
            key: key.into(),
            field: field.into(),
        });
        self
    }

    pub fn hash_get(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.commands.push(PipelineCommand::HashGet {
            key: key.into(),
            field: field.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[PipelineCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<PipelineCommand> {
        self.commands
    }
}

/// Reply to a single pipelined command.
///
/// `Unreadable` marks a reply that came back in a shape the command does not
/// produce. It is scoped to that one entry; the rest of the batch is fine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineReply {
    Exists(bool),
    Value(Option<Vec<u8>>),
    Unreadable(String),
}

impl PipelineReply {
    pub fn as_exists(&self) -> Option<bool> {
        match self {
            PipelineReply::Exists(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Field value as UTF-8 text. `None` for missing fields, non-text values
    /// and replies of the wrong shape.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PipelineReply::Value(Some(bytes)) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

/// Contract of the shared keyed store.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Reads the given fields of a hash in one call. Missing fields (or a
    /// missing hash) come back as `None`.
    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Writes the given fields, leaving other fields of the hash untouched.
    async fn hash_set(&self, key: &str, mapping: &[(&str, Vec<u8>)]) -> Result<()>;

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool>;

    /// One step of a cursor scan over keys matching a glob `pattern`.
    ///
    /// `page_size` is a hint. A full scan may return a key more than once and
    /// may miss keys created after it started.
    async fn scan(&self, cursor: u64, page_size: usize, pattern: &str) -> Result<ScanPage>;

    /// Executes all commands in a single round trip.
    async fn execute(&self, pipeline: StorePipeline) -> Result<Vec<PipelineReply>>;
}

/// Matches the subset of glob syntax the pipeline uses: literal keys and a
/// single trailing `*`.
pub(crate) fn glob_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching_covers_prefix_patterns() {
        assert!(glob_matches("hn:*", "hn:12"));
        assert!(!glob_matches("hn:*", "max:ID:hn"));
        assert!(glob_matches("max:ID:hn", "max:ID:hn"));
        assert!(glob_matches("*", "anything"));
    }

    #[test]
    fn reply_accessors_reject_mismatched_shapes() {
        assert_eq!(PipelineReply::Exists(true).as_exists(), Some(true));
        assert_eq!(PipelineReply::Value(Some(b"150".to_vec())).as_text(), Some("150"));
        assert_eq!(PipelineReply::Value(None).as_text(), None);
        assert_eq!(PipelineReply::Exists(false).as_text(), None);
        assert_eq!(PipelineReply::Unreadable("array".into()).as_exists(), None);
    }
}
