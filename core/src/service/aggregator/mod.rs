//! Aggregator (upsert engine)
//!
//! Turns claimed tasks into affected item IDs and rebuilds those items' index rows from
//! the source tables. Data access goes through [`SourceReader`] and [`IndexWriter`] so
//! the resolution and pooling logic can be exercised without a database.
//!
//! Writes are chunked: each chunk of `upsert_chunk_size` items is projected first and
//! then written in one transaction. Chunk boundaries are the only partial-progress
//! checkpoints; a failed chunk leaves earlier chunks written and later ones untouched.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
	domain::{IndexRow, MasterKind, Operation, SourceSnapshot, Task, TaskType},
	error::{ResolveError, WriteError},
};

mod index_writer;
pub mod projection;
mod source;

pub use index_writer::DbIndexStore;
pub use projection::project;
pub use source::{count_referencing_items, referencing_item_ids, DbSourceReader};

/// Read access to the source-of-truth tables.
#[async_trait]
pub trait SourceReader: Send + Sync {
	/// Non-deleted items referencing a master row, ascending.
	async fn items_referencing(&self, kind: MasterKind, target_id: i32) -> Result<Vec<i32>, DbErr>;

	/// Snapshots for the non-deleted items among `ids`. Missing and deleted items are
	/// simply absent from the result.
	async fn load_snapshots(&self, ids: &[i32]) -> Result<Vec<SourceSnapshot>, DbErr>;

	/// Keyset page of non-deleted item IDs greater than `after`.
	async fn active_item_ids_after(&self, after: Option<i32>, limit: usize)
		-> Result<Vec<i32>, DbErr>;
}

/// Write access to the index store.
#[async_trait]
pub trait IndexWriter: Send + Sync {
	/// Upsert `rows` and remove `remove` atomically. Returns the number of rows removed.
	async fn write_chunk(&self, rows: &[IndexRow], remove: &[i32]) -> Result<u64, DbErr>;

	async fn delete_rows(&self, ids: &[i32]) -> Result<u64, DbErr>;

	/// Remove rows whose item no longer exists or is deleted.
	async fn sweep_orphans(&self) -> Result<u64, DbErr>;
}

/// What one task expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	Entities(BTreeSet<i32>),
	/// Every non-deleted item, plus an orphan sweep
	Everything,
}

/// IDs pooled across a claimed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
	upserts: BTreeSet<i32>,
	deletes: BTreeSet<i32>,
	full_resync: bool,
}

impl BatchPlan {
	pub fn add(&mut self, operation: Operation, resolution: Resolution) {
		match resolution {
			Resolution::Everything => self.full_resync = true,
			Resolution::Entities(ids) => match operation {
				Operation::Upsert => self.upserts.extend(ids),
				Operation::Delete => self.deletes.extend(ids),
			},
		}
	}

	/// Upserts with every ID that is also being deleted removed.
	pub fn upsert_ids(&self) -> BTreeSet<i32> {
		self.upserts.difference(&self.deletes).copied().collect()
	}

	pub fn delete_ids(&self) -> &BTreeSet<i32> {
		&self.deletes
	}

	pub fn full_resync(&self) -> bool {
		self.full_resync
	}

	pub fn is_empty(&self) -> bool {
		self.upserts.is_empty() && self.deletes.is_empty() && !self.full_resync
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
	/// Index rows written
	pub upserted: u64,
	/// Index rows removed, including stale rows of missing or deleted items
	pub deleted: u64,
}

impl WriteReport {
	fn absorb(&mut self, other: Self) {
		self.upserted += other.upserted;
		self.deleted += other.deleted;
	}
}

#[derive(Clone)]
pub struct Aggregator {
	reader: Arc<dyn SourceReader>,
	writer: Arc<dyn IndexWriter>,
	chunk_size: usize,
}

impl Aggregator {
	pub fn new(reader: Arc<dyn SourceReader>, writer: Arc<dyn IndexWriter>, chunk_size: usize) -> Self {
		Self {
			reader,
			writer,
			chunk_size: chunk_size.max(1),
		}
	}

	/// Aggregator reading and writing through `db`.
	pub fn for_database(db: DatabaseConnection, chunk_size: usize) -> Self {
		Self::new(
			Arc::new(DbSourceReader::new(db.clone())),
			Arc::new(DbIndexStore::new(db)),
			chunk_size,
		)
	}

	pub async fn resolve_affected_ids(&self, task: &Task) -> Result<Resolution, ResolveError> {
		match task.task_type {
			TaskType::SingleEntityUpdate => {
				let id = task.entity_id.ok_or(ResolveError::MissingKey {
					task_id: task.id,
					task_type: task.task_type,
					field: "entity_id",
				})?;
				Ok(Resolution::Entities(BTreeSet::from([id])))
			}
			TaskType::FullResync => Ok(Resolution::Everything),
			task_type => {
				let missing = ResolveError::MissingKey {
					task_id: task.id,
					task_type,
					field: "target_id",
				};
				let (Some(kind), Some(target_id)) = (task_type.master_kind(), task.target_id) else {
					return Err(missing);
				};

				let ids = self
					.reader
					.items_referencing(kind, target_id)
					.await
					.map_err(|source| ResolveError::Database {
						task_id: task.id,
						task_type,
						source,
					})?;

				debug!(
					task_id = task.id,
					task_type = %task_type,
					target_id,
					affected = ids.len(),
					"Resolved aggregate task"
				);

				Ok(Resolution::Entities(ids.into_iter().collect()))
			}
		}
	}

	/// Rebuild the index rows of `ids` from scratch, one transaction per chunk.
	///
	/// IDs whose item is missing or deleted lose their index row instead.
	pub async fn upsert(&self, ids: &BTreeSet<i32>) -> Result<WriteReport, WriteError> {
		let ids = ids.iter().copied().collect::<Vec<_>>();
		let mut report = WriteReport::default();

		for chunk in ids.chunks(self.chunk_size) {
			report.absorb(self.upsert_chunk(chunk).await?);
		}

		Ok(report)
	}

	async fn upsert_chunk(&self, chunk: &[i32]) -> Result<WriteReport, WriteError> {
		let snapshots = self
			.reader
			.load_snapshots(chunk)
			.await
			.map_err(WriteError::Read)?;

		let now = Utc::now();
		let rows = snapshots
			.iter()
			.map(|snapshot| project(snapshot, now))
			.collect::<Vec<_>>();

		let live = rows.iter().map(|row| row.item_id).collect::<BTreeSet<_>>();
		let gone = chunk
			.iter()
			.copied()
			.filter(|id| !live.contains(id))
			.collect::<Vec<_>>();

		let deleted = self
			.writer
			.write_chunk(&rows, &gone)
			.await
			.map_err(|source| WriteError::Chunk {
				chunk_len: chunk.len(),
				source,
			})?;

		Ok(WriteReport {
			upserted: rows.len() as u64,
			deleted,
		})
	}

	pub async fn delete(&self, ids: &BTreeSet<i32>) -> Result<u64, WriteError> {
		let ids = ids.iter().copied().collect::<Vec<_>>();
		let mut deleted = 0;

		for chunk in ids.chunks(self.chunk_size) {
			deleted += self
				.writer
				.delete_rows(chunk)
				.await
				.map_err(|source| WriteError::Delete {
					count: chunk.len(),
					source,
				})?;
		}

		Ok(deleted)
	}

	/// Upsert every non-deleted item in keyset-paginated chunks, then sweep index rows
	/// left behind by deleted or vanished items.
	pub async fn backfill_all(&self) -> Result<WriteReport, WriteError> {
		info!(chunk_size = self.chunk_size, "Starting full index backfill");

		let mut report = WriteReport::default();
		let mut after = None;

		loop {
			let page = self
				.reader
				.active_item_ids_after(after, self.chunk_size)
				.await
				.map_err(WriteError::Read)?;
			let Some(&last) = page.last() else {
				break;
			};

			report.absorb(self.upsert_chunk(&page).await?);
			after = Some(last);

			if page.len() < self.chunk_size {
				break;
			}
		}

		report.deleted += self
			.writer
			.sweep_orphans()
			.await
			.map_err(WriteError::Sweep)?;

		info!(
			upserted = report.upserted,
			deleted = report.deleted,
			"Finished full index backfill"
		);

		Ok(report)
	}

	/// Apply a pooled batch. Deletes are applied last so they win over a full resync
	/// in the same batch.
	pub async fn apply(&self, plan: &BatchPlan) -> Result<WriteReport, WriteError> {
		let mut report = WriteReport::default();

		if plan.full_resync() {
			report.absorb(self.backfill_all().await?);
		} else {
			report.absorb(self.upsert(&plan.upsert_ids()).await?);
		}

		report.deleted += self.delete(plan.delete_ids()).await?;

		Ok(report)
	}
}
