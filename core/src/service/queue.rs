//! Durable task queue store
//!
//! All row transitions live here: enqueue/merge, claim, completion and requeue. Each one
//! is a single conditional statement (or a short write-first transaction for requeue),
//! so concurrent emitters and workers never need an application-level lock.
//!
//! SQLite has no `SKIP LOCKED`. Claims select a window of candidates and then flip each
//! row with a compare-and-swap `UPDATE … WHERE processing = 0 … RETURNING`; a row
//! another worker won simply comes back empty and is skipped.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sea_orm::{
	sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
	FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, Statement, TransactionTrait, Value,
};
use tracing::{debug, warn};

use crate::{
	domain::{NewTask, Task},
	error::QueueError,
	infra::db::entities::sync_task,
};

/// How a requeue treats the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
	/// Failed attempt: `retry_count + 1`, saturating at `max_retries`
	Increment,
	/// Administrative reset: `retry_count = 0`
	Reset,
}

/// What a requeue did with the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
	/// Reset in place to pending
	Reset,
	/// A newer pending task held the same dedup key; the row was merged into it and removed
	Folded,
	/// The row was gone or owned by someone else
	Missing,
}

#[derive(Debug, FromQueryResult)]
struct CandidateId {
	id: i32,
}

const CLAIM_ORDER: &str = "priority DESC, retry_count ASC, \
	(estimated_affected_count IS NULL) ASC, estimated_affected_count ASC, \
	queued_at ASC, id ASC";

#[derive(Clone)]
pub struct QueueStore {
	db: DatabaseConnection,
}

impl QueueStore {
	pub fn new(db: DatabaseConnection) -> Self {
		Self { db }
	}

	pub fn conn(&self) -> &DatabaseConnection {
		&self.db
	}

	pub async fn enqueue(&self, task: &NewTask) -> Result<Task, QueueError> {
		Self::enqueue_on(&self.db, task).await
	}

	/// Insert a pending task or merge into the one already pending for its dedup key.
	///
	/// Runs on any connection so emitters can enqueue inside the mutation's own
	/// transaction. The merge refreshes `queued_at`, resets the retry budget, widens the
	/// priority and lets a delete win over an upsert.
	pub async fn enqueue_on<C: ConnectionTrait>(conn: &C, task: &NewTask) -> Result<Task, QueueError> {
		task.validate().map_err(QueueError::Rejected)?;

		let dedup_key = task.dedup_key();
		let model = sync_task::Entity::find()
			.from_raw_sql(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				r#"
				INSERT INTO sync_task (
					dedup_key, task_type, entity_id, target_id, operation, priority,
					estimated_affected_count, queued_at, processing, retry_count, max_retries, metadata
				)
				VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
				ON CONFLICT (dedup_key) WHERE processing = 0 DO UPDATE SET
					queued_at = excluded.queued_at,
					retry_count = 0,
					processing = 0,
					worker_id = NULL,
					priority = MAX(sync_task.priority, excluded.priority),
					operation = CASE
						WHEN sync_task.operation = 'delete' OR excluded.operation = 'delete' THEN 'delete'
						ELSE 'upsert'
					END,
					estimated_affected_count = COALESCE(
						excluded.estimated_affected_count,
						sync_task.estimated_affected_count
					),
					max_retries = MAX(sync_task.max_retries, excluded.max_retries),
					metadata = COALESCE(excluded.metadata, sync_task.metadata)
				RETURNING *
				"#,
				vec![
					dedup_key.clone().into(),
					task.task_type.to_string().into(),
					task.entity_id.into(),
					task.target_id.into(),
					task.operation.to_string().into(),
					task.priority.into(),
					task.estimated_affected_count.into(),
					Utc::now().into(),
					task.max_retries.into(),
					task.metadata.clone().into(),
				],
			))
			.one(conn)
			.await?
			.ok_or_else(|| QueueError::EnqueueLost(dedup_key.clone()))?;

		let stored = Task::try_from(model)?;
		debug!(
			task_id = stored.id,
			dedup_key = %dedup_key,
			operation = %stored.operation,
			priority = stored.priority,
			"Enqueued sync task"
		);

		Ok(stored)
	}

	/// Claim up to `limit` eligible tasks for `worker_id`.
	///
	/// Candidates are taken in claim order and flipped one by one. Rows lost to another
	/// worker are skipped; up to `rounds` passes refill the batch from the next
	/// candidates. A row that cannot be claimed or parsed is released with the error
	/// recorded and does not abort the rest of the batch. Once some tasks are claimed, a
	/// failing candidate lookup ends the batch early instead of stranding them.
	pub async fn claim_batch(
		&self,
		worker_id: &str,
		limit: usize,
		rounds: usize,
	) -> Result<Vec<Task>, QueueError> {
		let mut claimed = Vec::with_capacity(limit);
		let mut attempted = HashSet::new();

		for round in 0..rounds.max(1) {
			let wanted = limit - claimed.len();
			if wanted == 0 {
				break;
			}

			let candidates = match self.candidates(wanted + attempted.len()).await {
				Ok(candidates) => candidates,
				Err(e) if !claimed.is_empty() => {
					warn!(
						worker_id,
						claimed = claimed.len(),
						error = %e,
						"Candidate lookup failed, keeping partial batch"
					);
					break;
				}
				Err(e) => return Err(e),
			};
			let fresh = candidates
				.into_iter()
				.filter(|id| !attempted.contains(id))
				.take(wanted)
				.collect::<Vec<_>>();
			if fresh.is_empty() {
				break;
			}

			let mut lost = 0;
			for id in fresh {
				attempted.insert(id);

				match self.claim_one(id, worker_id).await {
					Ok(Some(model)) => match Task::try_from(model) {
						Ok(task) => claimed.push(task),
						Err(e) => {
							warn!(task_id = id, worker_id, error = %e, "Claimed an unreadable task");
							self.release_failed_claim(id, worker_id, &e.to_string()).await;
						}
					},
					Ok(None) => lost += 1,
					Err(e) => {
						warn!(task_id = id, worker_id, error = %e, "Failed to claim task");
						self.release_failed_claim(id, worker_id, &format!("claim failed: {e}"))
							.await;
					}
				}
			}

			debug!(round, lost, claimed = claimed.len(), worker_id, "Claim round finished");

			if lost == 0 {
				break;
			}
		}

		Ok(claimed)
	}

	/// Charge a retry to a task whose claim failed and leave it pending.
	///
	/// Only a row claimed by `worker_id` or still pending is touched, never another
	/// worker's claim. Errors are logged: the rest of the batch goes on regardless.
	pub async fn release_failed_claim(&self, id: i32, worker_id: &str, error: &str) {
		let released = match self
			.requeue(id, Some(worker_id), error, None, RetryPolicy::Increment)
			.await
		{
			Ok(RequeueOutcome::Missing) => self.record_pending_failure(id, error).await,
			Ok(_) => Ok(()),
			Err(e) => Err(e),
		};

		if let Err(e) = released {
			warn!(task_id = id, worker_id, error = %e, "Failed to release task after claim failure");
		}
	}

	async fn record_pending_failure(&self, id: i32, error: &str) -> Result<(), QueueError> {
		self.db
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				r#"
				UPDATE sync_task
				SET retry_count = MIN(retry_count + 1, max_retries), last_error = ?
				WHERE id = ? AND processing = 0
				"#,
				vec![error.into(), id.into()],
			))
			.await?;
		Ok(())
	}

	async fn candidates(&self, limit: usize) -> Result<Vec<i32>, QueueError> {
		let rows = CandidateId::find_by_statement(Statement::from_sql_and_values(
			DbBackend::Sqlite,
			format!(
				"SELECT id FROM sync_task \
				 WHERE processing = 0 AND retry_count < max_retries \
				 ORDER BY {CLAIM_ORDER} LIMIT ?"
			),
			vec![(limit as i64).into()],
		))
		.all(&self.db)
		.await?;

		Ok(rows.into_iter().map(|row| row.id).collect())
	}

	async fn claim_one(
		&self,
		id: i32,
		worker_id: &str,
	) -> Result<Option<sync_task::Model>, QueueError> {
		Ok(sync_task::Entity::find()
			.from_raw_sql(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				r#"
				UPDATE sync_task
				SET processing = 1, started_at = ?, worker_id = ?
				WHERE id = ? AND processing = 0 AND retry_count < max_retries
				RETURNING *
				"#,
				vec![Utc::now().into(), worker_id.into(), id.into()],
			))
			.one(&self.db)
			.await?)
	}

	/// Delete successfully processed tasks still owned by `worker_id`.
	pub async fn complete(&self, worker_id: &str, ids: &[i32]) -> Result<u64, QueueError> {
		if ids.is_empty() {
			return Ok(0);
		}

		let placeholders = vec!["?"; ids.len()].join(", ");
		let mut values: Vec<Value> = vec![worker_id.into()];
		values.extend(ids.iter().map(|id| Value::from(*id)));

		let result = self
			.db
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				format!(
					"DELETE FROM sync_task \
					 WHERE processing = 1 AND worker_id = ? AND id IN ({placeholders})"
				),
				values,
			))
			.await?;

		Ok(result.rows_affected())
	}

	/// Return a task to the pending state with the error recorded.
	///
	/// When `owner` is set only a row still claimed by that worker is touched. If
	/// another pending row already holds the dedup key, the failed row is merged into it
	/// and deleted, since two pending rows per key are not allowed.
	pub async fn requeue(
		&self,
		id: i32,
		owner: Option<&str>,
		error: &str,
		details: Option<serde_json::Value>,
		policy: RetryPolicy,
	) -> Result<RequeueOutcome, QueueError> {
		let owner = owner.map(str::to_owned);
		let txn = self.db.begin().await?;

		// First statement is a write so the transaction takes the write lock up front
		let folded = txn
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				r#"
				UPDATE sync_task SET
					priority = MAX(priority, (SELECT f.priority FROM sync_task f WHERE f.id = ?)),
					operation = CASE
						WHEN operation = 'delete'
							OR (SELECT f.operation FROM sync_task f WHERE f.id = ?) = 'delete'
						THEN 'delete'
						ELSE 'upsert'
					END,
					estimated_affected_count = COALESCE(
						estimated_affected_count,
						(SELECT f.estimated_affected_count FROM sync_task f WHERE f.id = ?)
					)
				WHERE processing = 0
					AND id != ?
					AND dedup_key = (
						SELECT f.dedup_key FROM sync_task f
						WHERE f.id = ? AND (? IS NULL OR f.worker_id = ?)
					)
				"#,
				vec![
					id.into(),
					id.into(),
					id.into(),
					id.into(),
					id.into(),
					owner.clone().into(),
					owner.clone().into(),
				],
			))
			.await?
			.rows_affected();

		if folded > 0 {
			txn.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				"DELETE FROM sync_task WHERE id = ?",
				vec![id.into()],
			))
			.await?;
			txn.commit().await?;

			debug!(task_id = id, error, "Folded failed task into pending duplicate");
			return Ok(RequeueOutcome::Folded);
		}

		let retry = match policy {
			RetryPolicy::Increment => "MIN(retry_count + 1, max_retries)",
			RetryPolicy::Reset => "0",
		};
		let reset = txn
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				format!(
					"UPDATE sync_task SET \
						processing = 0, worker_id = NULL, retry_count = {retry}, \
						last_error = ?, error_details = ? \
					 WHERE id = ? AND (? IS NULL OR worker_id = ?)"
				),
				vec![
					error.into(),
					details.into(),
					id.into(),
					owner.clone().into(),
					owner.clone().into(),
				],
			))
			.await?
			.rows_affected();
		txn.commit().await?;

		Ok(if reset > 0 {
			RequeueOutcome::Reset
		} else {
			RequeueOutcome::Missing
		})
	}

	/// Tasks processing since before `cutoff` that still have retry budget.
	pub async fn stuck_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, QueueError> {
		sync_task::Entity::find()
			.filter(sync_task::Column::Processing.eq(true))
			.filter(sync_task::Column::StartedAt.lt(cutoff))
			.filter(
				Expr::col(sync_task::Column::RetryCount).lt(Expr::col(sync_task::Column::MaxRetries)),
			)
			.order_by_asc(sync_task::Column::StartedAt)
			.all(&self.db)
			.await?
			.into_iter()
			.map(Task::try_from)
			.collect()
	}

	/// Every task currently claimed by some worker.
	pub async fn processing(&self) -> Result<Vec<Task>, QueueError> {
		sync_task::Entity::find()
			.filter(sync_task::Column::Processing.eq(true))
			.order_by_asc(sync_task::Column::Id)
			.all(&self.db)
			.await?
			.into_iter()
			.map(Task::try_from)
			.collect()
	}

	/// Permanently delete dead tasks whose last activity is older than `cutoff`.
	pub async fn purge_dead(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
		let result = self
			.db
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				r#"
				DELETE FROM sync_task
				WHERE processing = 0
					AND retry_count >= max_retries
					AND COALESCE(started_at, queued_at) < ?
				"#,
				vec![cutoff.into()],
			))
			.await?;

		Ok(result.rows_affected())
	}

	pub async fn get(&self, id: i32) -> Result<Option<Task>, QueueError> {
		sync_task::Entity::find_by_id(id)
			.one(&self.db)
			.await?
			.map(Task::try_from)
			.transpose()
	}

	/// All rows in claim order, processing rows included.
	pub async fn list(&self) -> Result<Vec<Task>, QueueError> {
		sync_task::Entity::find()
			.order_by_desc(sync_task::Column::Priority)
			.order_by_asc(sync_task::Column::RetryCount)
			.order_by_asc(sync_task::Column::QueuedAt)
			.order_by_asc(sync_task::Column::Id)
			.all(&self.db)
			.await?
			.into_iter()
			.map(Task::try_from)
			.collect()
	}

	pub async fn count(&self) -> Result<u64, QueueError> {
		Ok(sync_task::Entity::find().count(&self.db).await?)
	}
}
