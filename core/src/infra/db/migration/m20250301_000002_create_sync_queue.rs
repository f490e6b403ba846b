//! Create the durable sync task queue
//!
//! Written as raw SQL because the builder cannot express CHECK constraints or the
//! partial unique index that allows one pending row per dedup key while an in-flight
//! row for the same key exists.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		let db = manager.get_connection();

		db.execute_unprepared(
			r#"
			CREATE TABLE IF NOT EXISTS sync_task (
				id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
				dedup_key TEXT NOT NULL,
				task_type TEXT NOT NULL CHECK (task_type IN (
					'single_entity_update',
					'resync_by_category',
					'resync_by_tag',
					'resync_by_owner',
					'resync_by_file',
					'resync_by_subcomponent',
					'full_resync'
				)),
				entity_id INTEGER,
				target_id INTEGER,
				operation TEXT NOT NULL DEFAULT 'upsert' CHECK (operation IN ('upsert', 'delete')),
				priority INTEGER NOT NULL DEFAULT 0 CHECK (priority BETWEEN 0 AND 10),
				estimated_affected_count BIGINT,
				queued_at TEXT NOT NULL,
				started_at TEXT,
				completed_at TEXT,
				processing BOOLEAN NOT NULL DEFAULT 0,
				worker_id TEXT,
				retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
				max_retries INTEGER NOT NULL DEFAULT 3 CHECK (max_retries >= 1),
				last_error TEXT,
				error_details TEXT,
				metadata TEXT,
				CHECK (retry_count <= max_retries),
				CHECK (
					(task_type = 'single_entity_update' AND entity_id IS NOT NULL AND target_id IS NULL)
					OR (task_type = 'full_resync' AND entity_id IS NULL AND target_id IS NULL)
					OR (task_type NOT IN ('single_entity_update', 'full_resync')
						AND entity_id IS NULL AND target_id IS NOT NULL AND operation = 'upsert')
				)
			)
			"#,
		)
		.await?;

		// One pending row per key; claimed rows drop out of the index
		db.execute_unprepared(
			"CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_task_pending_dedup \
			 ON sync_task (dedup_key) WHERE processing = 0",
		)
		.await?;

		// Claim scan
		db.execute_unprepared(
			"CREATE INDEX IF NOT EXISTS idx_sync_task_claim \
			 ON sync_task (processing, priority DESC, retry_count, queued_at)",
		)
		.await?;

		// Stuck detection
		db.execute_unprepared(
			"CREATE INDEX IF NOT EXISTS idx_sync_task_started \
			 ON sync_task (started_at) WHERE processing = 1",
		)
		.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(SyncTask::Table).to_owned())
			.await?;

		Ok(())
	}
}

#[derive(DeriveIden)]
enum SyncTask {
	Table,
}
