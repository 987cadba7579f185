//! Core data model definitions shared across Harvester crates.
#![allow(missing_docs)]

pub mod embedding;
pub mod error;
pub mod ids;
pub mod item;
pub mod keys;

pub use embedding::{DIMENSIONS, Embedding};
pub use error::ModelError;
pub use ids::{ItemId, JobKey, JobPurpose};
pub use item::{FeedItem, Rejection, StoredItem, TRACKED_KIND, fields};
pub use keys::KeyLayout;
