use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::ModelError;

/// Upstream feed identifier. The feed hands these out in strictly increasing
/// order, which is what makes watermark based backfill possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ItemId(pub u64);

impl ItemId {
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Saturating successor; the feed never gets close to `u64::MAX`.
    pub fn next(&self) -> ItemId {
        ItemId(self.0.saturating_add(1))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(ItemId)
            .map_err(|_| ModelError::InvalidItemId(s.to_string()))
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        ItemId(value)
    }
}

/// Purpose tag carried in a job key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobPurpose {
    FetchItem,
    ComputeEmbedding,
}

impl JobPurpose {
    pub fn prefix(&self) -> &'static str {
        match self {
            JobPurpose::FetchItem => "fetch_",
            JobPurpose::ComputeEmbedding => "embedding_",
        }
    }
}

impl fmt::Display for JobPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPurpose::FetchItem => write!(f, "fetch"),
            JobPurpose::ComputeEmbedding => write!(f, "embedding"),
        }
    }
}

/// Queue-wide job identifier.
///
/// Embedding jobs use the deterministic `embedding_<id>` form so that the
/// eligibility scanner can ask the queue whether work for an item already
/// exists. Fetch jobs get a unique suffix: re-fetching an item must never be
/// suppressed by an older job record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct JobKey(String);

impl JobKey {
    pub fn embedding(item: ItemId) -> Self {
        Self(format!("{}{}", JobPurpose::ComputeEmbedding.prefix(), item))
    }

    pub fn fetch(item: ItemId) -> Self {
        Self(format!(
            "{}{}_{}",
            JobPurpose::FetchItem.prefix(),
            item,
            Uuid::now_v7().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn purpose(&self) -> Option<JobPurpose> {
        [JobPurpose::ComputeEmbedding, JobPurpose::FetchItem]
            .into_iter()
            .find(|purpose| self.0.starts_with(purpose.prefix()))
    }

    /// Item the job refers to, recovered from the key itself.
    pub fn item_id(&self) -> Option<ItemId> {
        let purpose = self.purpose()?;
        let rest = &self.0[purpose.prefix().len()..];
        let raw = match purpose {
            JobPurpose::ComputeEmbedding => rest,
            JobPurpose::FetchItem => rest.split('_').next()?,
        };
        raw.parse().ok()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = JobKey(s.to_string());
        match key.item_id() {
            Some(_) => Ok(key),
            None => Err(ModelError::InvalidJobKey(s.to_string())),
        }
    }
}

impl AsRef<str> for JobKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
