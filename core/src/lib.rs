#![warn(
	clippy::all,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::dbg_macro,
	deprecated
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Search index synchronization.
//!
//! Keeps the denormalized `search_index` projection eventually consistent with the
//! normalized catalog tables. Mutations enqueue (or merge into) rows of the durable
//! `sync_task` queue, workers claim bounded batches, resolve them into affected item
//! IDs and rebuild those index rows from scratch.
//!
//! ```text
//! mutation -> ChangeEmitter -> sync_task -> SyncProcessor::run_cycle
//!                                             |- QueueStore::claim_batch
//!                                             |- Aggregator::resolve_affected_ids
//!                                             |- Aggregator::apply (chunked upserts / deletes)
//!                                             `- QueueStore::complete / requeue
//! HealthMonitor: get_health, cleanup, emergency_reset
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod ops;
pub mod service;

pub use config::SyncConfig;
pub use error::{Error, QueueError, ResolveError, Result, WriteError};
pub use infra::db::Database;
pub use ops::{
	catalog::Catalog,
	search::{SearchPage, SearchQuery},
};
pub use service::{
	aggregator::{Aggregator, DbIndexStore, DbSourceReader, IndexWriter, SourceReader, WriteReport},
	emitter::{ChangeEmitter, ItemChange, LinkChange, LinkTable, MasterRecord, SuppressionGuard},
	health::{CleanupReport, HealthLabel, HealthMonitor, HealthReport},
	processor::{CycleReport, SyncProcessor},
	queue::{QueueStore, RequeueOutcome, RetryPolicy},
	worker::SyncWorker,
};
