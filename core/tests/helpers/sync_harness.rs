//! Common test harness for search sync integration tests
//!
//! Every harness owns a fresh SQLite database in a temporary directory with all
//! migrations applied.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use sd_search_sync::{
	domain::{IndexRow, NewTask},
	infra::db::{entities::search_index, DATABASE_FILE_NAME},
	ops::catalog::{Catalog, NewItem},
	Aggregator, ChangeEmitter, CycleReport, Database, DbIndexStore, HealthMonitor, QueueStore,
	SourceReader, SyncConfig, SyncProcessor,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, Statement};
use tempfile::TempDir;

pub struct SyncHarness {
	_dir: TempDir,
	pub db: Database,
	pub config: SyncConfig,
	pub catalog: Catalog,
	pub queue: QueueStore,
}

impl SyncHarness {
	pub async fn new() -> anyhow::Result<Self> {
		Self::with_config(SyncConfig::default()).await
	}

	pub async fn with_config(config: SyncConfig) -> anyhow::Result<Self> {
		let dir = tempfile::tempdir()?;
		let db = Database::open_or_create(&dir.path().join(DATABASE_FILE_NAME)).await?;

		Ok(Self {
			catalog: Catalog::new(db.conn().clone(), ChangeEmitter::new(&config)),
			queue: QueueStore::new(db.conn().clone()),
			_dir: dir,
			db,
			config,
		})
	}

	pub fn conn(&self) -> &DatabaseConnection {
		self.db.conn()
	}

	pub fn aggregator(&self) -> Aggregator {
		Aggregator::for_database(self.conn().clone(), self.config.upsert_chunk_size)
	}

	/// Aggregator reading through `reader` but writing the real index.
	pub fn aggregator_with_reader(&self, reader: Arc<dyn SourceReader>) -> Aggregator {
		Aggregator::new(
			reader,
			Arc::new(DbIndexStore::new(self.conn().clone())),
			self.config.upsert_chunk_size,
		)
	}

	pub fn processor(&self, worker_id: &str) -> SyncProcessor {
		SyncProcessor::new(self.queue.clone(), self.aggregator(), worker_id, &self.config)
	}

	pub fn health(&self) -> HealthMonitor {
		HealthMonitor::new(self.queue.clone(), &self.config)
	}

	/// Enqueue with the harness retry budget.
	pub async fn enqueue(&self, task: NewTask) -> anyhow::Result<sd_search_sync::domain::Task> {
		Ok(self
			.queue
			.enqueue(&task.with_max_retries(self.config.max_retries))
			.await?)
	}

	/// Run cycles until one claims nothing.
	pub async fn drain(&self) -> anyhow::Result<Vec<CycleReport>> {
		let processor = self.processor("drain");
		let mut reports = Vec::new();
		loop {
			let report = processor.run_cycle().await?;
			if report.claimed == 0 {
				return Ok(reports);
			}
			reports.push(report);
		}
	}

	pub async fn create_items(&self, count: usize, prefix: &str) -> anyhow::Result<Vec<i32>> {
		let mut ids = Vec::with_capacity(count);
		for n in 0..count {
			let item = self
				.catalog
				.create_item(NewItem::named(format!("{prefix} {n}")))
				.await?;
			ids.push(item.id);
		}
		Ok(ids)
	}

	pub async fn index_model(&self, item_id: i32) -> anyhow::Result<Option<search_index::Model>> {
		Ok(search_index::Entity::find_by_id(item_id)
			.one(self.conn())
			.await?)
	}

	pub async fn index_row(&self, item_id: i32) -> anyhow::Result<Option<IndexRow>> {
		Ok(self
			.index_model(item_id)
			.await?
			.map(IndexRow::try_from)
			.transpose()?)
	}

	pub async fn fts_rows(&self, item_id: i32) -> anyhow::Result<i64> {
		let row = self
			.conn()
			.query_one(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				"SELECT COUNT(*) AS n FROM search_index_fts WHERE rowid = ?",
				vec![item_id.into()],
			))
			.await?;
		Ok(match row {
			Some(row) => row.try_get("", "n")?,
			None => 0,
		})
	}

	pub async fn queue_len(&self) -> anyhow::Result<u64> {
		Ok(self.queue.count().await?)
	}

	/// Backdate a claim so it looks abandoned.
	pub async fn backdate_claim(&self, task_id: i32, by: Duration) -> anyhow::Result<()> {
		let started = chrono::Utc::now() - chrono::Duration::from_std(by)?;
		self.conn()
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				"UPDATE sync_task SET started_at = ? WHERE id = ?",
				vec![started.into(), task_id.into()],
			))
			.await?;
		Ok(())
	}
}
