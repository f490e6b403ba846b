//! One claim-resolve-write-complete cycle

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{
	aggregator::{Aggregator, BatchPlan},
	queue::{QueueStore, RetryPolicy},
};
use crate::{config::SyncConfig, error::Result};

/// Outcome of one processing cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
	pub claimed: usize,
	/// Tasks removed from the queue after a successful write
	pub completed: u64,
	/// Tasks requeued because their resolution failed
	pub failed: usize,
	pub upserted: u64,
	pub deleted: u64,
	pub full_resync: bool,
}

pub struct SyncProcessor {
	queue: QueueStore,
	aggregator: Aggregator,
	worker_id: String,
	batch_size: usize,
	claim_rounds: usize,
}

impl SyncProcessor {
	pub fn new(
		queue: QueueStore,
		aggregator: Aggregator,
		worker_id: impl Into<String>,
		config: &SyncConfig,
	) -> Self {
		Self {
			queue,
			aggregator,
			worker_id: worker_id.into(),
			batch_size: config.batch_size,
			claim_rounds: config.claim_rounds,
		}
	}

	pub fn worker_id(&self) -> &str {
		&self.worker_id
	}

	pub fn batch_size(&self) -> usize {
		self.batch_size
	}

	/// Claim a batch, resolve every task on its own, write the pooled result and settle
	/// the queue.
	///
	/// A task whose resolution fails is requeued with the error while its siblings carry
	/// on. If the pooled write fails, every resolved task is requeued and the error is
	/// returned; nothing from the batch is deleted.
	pub async fn run_cycle(&self) -> Result<CycleReport> {
		let tasks = self
			.queue
			.claim_batch(&self.worker_id, self.batch_size, self.claim_rounds)
			.await?;

		let mut report = CycleReport {
			claimed: tasks.len(),
			..Default::default()
		};
		if tasks.is_empty() {
			return Ok(report);
		}

		debug!(worker_id = %self.worker_id, claimed = tasks.len(), "Claimed sync batch");

		let mut plan = BatchPlan::default();
		let mut resolved = Vec::with_capacity(tasks.len());

		for task in &tasks {
			match self.aggregator.resolve_affected_ids(task).await {
				Ok(resolution) => {
					plan.add(task.operation, resolution);
					resolved.push(task.id);
				}
				Err(e) => {
					warn!(
						task_id = task.id,
						task_type = %task.task_type,
						entity_id = ?task.entity_id,
						target_id = ?task.target_id,
						retry_count = task.retry_count,
						error = %e,
						"Failed to resolve sync task"
					);
					self.release(
						task.id,
						&e.summary(),
						json!({
							"stage": "resolve",
							"error": e.to_string(),
							"task_type": task.task_type,
							"entity_id": task.entity_id,
							"target_id": task.target_id,
						}),
					)
					.await;
					report.failed += 1;
				}
			}
		}

		report.full_resync = plan.full_resync();

		let written = match self.aggregator.apply(&plan).await {
			Ok(written) => written,
			Err(e) => {
				warn!(
					worker_id = %self.worker_id,
					tasks = resolved.len(),
					error = %e,
					"Index write failed, requeueing batch"
				);
				for id in &resolved {
					self.release(
						*id,
						&format!("write failed: {e}"),
						json!({ "stage": "write", "error": e.to_string() }),
					)
					.await;
				}
				return Err(e.into());
			}
		};

		report.upserted = written.upserted;
		report.deleted = written.deleted;
		report.completed = self.queue.complete(&self.worker_id, &resolved).await?;

		info!(
			worker_id = %self.worker_id,
			claimed = report.claimed,
			completed = report.completed,
			failed = report.failed,
			upserted = report.upserted,
			deleted = report.deleted,
			"Processed sync batch"
		);

		Ok(report)
	}

	/// Requeue one of our claimed tasks with a retry charged.
	///
	/// A failed requeue is logged and skipped so the remaining tasks still get released;
	/// the row stays claimed until the stuck reclaim picks it up.
	async fn release(&self, task_id: i32, error: &str, details: serde_json::Value) {
		if let Err(e) = self
			.queue
			.requeue(
				task_id,
				Some(&self.worker_id),
				error,
				Some(details),
				RetryPolicy::Increment,
			)
			.await
		{
			warn!(
				task_id,
				worker_id = %self.worker_id,
				error = %e,
				"Failed to requeue sync task"
			);
		}
	}
}
