//! # Harvester Core
//!
//! Ingestion pipeline for a sequentially numbered content feed (Hacker News).
//!
//! ## Overview
//!
//! Two independent controllers share a keyed store and a work queue:
//!
//! - **Backfill**: compares the persisted watermark with the feed's max ID
//!   and enqueues one fetch job per new ID ([`backfill`]).
//! - **Eligibility scan**: walks every stored item in cursor pages and
//!   enqueues an embedding job for items that are popular enough, have no
//!   embedding yet and no job in flight ([`scanner`]).
//!
//! Workers pull both kinds of jobs off the queue and run them ([`jobs`],
//! [`runtime`]).
//!
//! ## Architecture
//!
//! - [`store`]: [`store::KeyedStore`] port, Redis adapter, in-memory fake
//! - [`queue`]: [`queue::WorkQueue`] port, Redis adapter, in-memory fake
//! - [`feed`]: [`feed::FeedClient`] port and the HTTP client
//! - [`embedder`]: [`embedder::Embedder`] port and the placeholder model
//! - [`codec`]: on-store encoding of embeddings
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use harvester_core::{
//!     backfill::BackfillController,
//!     config::HarvesterSettings,
//!     feed::HackerNewsClient,
//!     queue::InMemoryQueue,
//!     store::InMemoryStore,
//! };
//! use harvester_model::KeyLayout;
//!
//! async fn backfill_once() -> harvester_core::Result<()> {
//!     let settings = HarvesterSettings::default();
//!     let controller = BackfillController::new(
//!         Arc::new(HackerNewsClient::new(&settings.feed)?),
//!         Arc::new(InMemoryQueue::new()),
//!         Arc::new(InMemoryStore::new()),
//!         KeyLayout::new(settings.feed_prefix.clone()),
//!         settings.backfill,
//!     );
//!     let report = controller.run_once().await?;
//!     println!("enqueued {} fetch jobs", report.enqueued);
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]

pub mod backfill;
pub mod codec;
pub mod config;
pub mod embedder;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod queue;
pub mod redis_io;
pub mod runtime;
pub mod scanner;
pub mod store;

pub use backfill::{BackfillController, BackfillReport};
pub use config::HarvesterSettings;
pub use error::{HarvestError, Result};
pub use scanner::{EligibilityScanner, ScanReport};
