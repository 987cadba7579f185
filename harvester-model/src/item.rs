use std::fmt;

use crate::ids::ItemId;

/// Hash field names used for item records in the keyed store.
pub mod fields {
    pub const BY: &str = "by";
    pub const TITLE: &str = "title";
    pub const URL: &str = "url";
    pub const SCORE: &str = "score";
    pub const TIME: &str = "time";
    pub const COMMENTS: &str = "comments";
    pub const EMBEDDINGS: &str = "embeddings";
}

/// The only upstream item type the pipeline tracks.
pub const TRACKED_KIND: &str = "story";

/// Item exactly as the upstream feed returns it. Every field other than the
/// id is optional upstream, so validation happens in [`StoredItem::from_feed`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeedItem {
    pub id: ItemId,
    #[cfg_attr(feature = "serde", serde(rename = "type", default))]
    pub kind: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub by: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub title: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub url: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub score: Option<i64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub time: Option<i64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub descendants: Option<i64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub deleted: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub dead: bool,
}

/// Why an upstream item was not turned into a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Item type other than [`TRACKED_KIND`] (comments, jobs, polls...).
    NotTracked(String),
    /// Deleted or dead upstream.
    Removed,
    MissingField(&'static str),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotTracked(kind) => {
                write!(f, "item type '{kind}' is not tracked")
            }
            Rejection::Removed => write!(f, "item was deleted upstream"),
            Rejection::MissingField(field) => {
                write!(f, "missing required field '{field}'")
            }
        }
    }
}

/// Record persisted per item, minus the embedding which is written
/// separately by the embedding job.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoredItem {
    pub id: ItemId,
    pub author: String,
    pub title: String,
    /// Empty for self-text items.
    pub url: String,
    pub score: i64,
    pub time: i64,
    pub comments: i64,
}

impl StoredItem {
    pub fn from_feed(item: FeedItem) -> Result<Self, Rejection> {
        let kind = item.kind.ok_or(Rejection::MissingField("type"))?;
        if kind != TRACKED_KIND {
            return Err(Rejection::NotTracked(kind));
        }
        if item.deleted || item.dead {
            return Err(Rejection::Removed);
        }

        Ok(Self {
            id: item.id,
            author: item.by.ok_or(Rejection::MissingField(fields::BY))?,
            title: item.title.ok_or(Rejection::MissingField(fields::TITLE))?,
            url: item.url.unwrap_or_default(),
            score: item.score.ok_or(Rejection::MissingField(fields::SCORE))?,
            time: item.time.ok_or(Rejection::MissingField(fields::TIME))?,
            comments: item.descendants.unwrap_or(0),
        })
    }

    /// Field/value pairs written with a single hash set. The embedding field
    /// is deliberately absent so a re-fetch never clears it.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (fields::BY, self.author.clone()),
            (fields::TITLE, self.title.clone()),
            (fields::URL, self.url.clone()),
            (fields::SCORE, self.score.to_string()),
            (fields::TIME, self.time.to_string()),
            (fields::COMMENTS, self.comments.to_string()),
        ]
    }
}
