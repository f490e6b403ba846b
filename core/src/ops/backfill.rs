//! Full resync and bulk backfill
//!
//! `enqueue_full_resync` queues the rebuild for whichever worker claims it next;
//! `backfill_all` runs it inline, e.g. at deployment time before any worker exists.

use std::time::Instant;

use serde_json::json;
use tracing::info;

use crate::{
	domain::{NewTask, Task},
	error::{QueueError, WriteError},
	service::{
		aggregator::{Aggregator, WriteReport},
		queue::QueueStore,
	},
};

/// Queue a synthetic "rebuild everything" task. At most one is ever pending; asking
/// again merges into it.
pub async fn enqueue_full_resync(queue: &QueueStore, max_retries: i32) -> Result<Task, QueueError> {
	let task = queue
		.enqueue(
			&NewTask::full_resync()
				.with_max_retries(max_retries)
				.with_metadata(json!({ "trigger": "admin" })),
		)
		.await?;

	info!(task_id = task.id, queued_at = %task.queued_at, "Enqueued full resync");

	Ok(task)
}

/// Rebuild every index row inline and sweep rows of deleted items.
pub async fn backfill_all(aggregator: &Aggregator) -> Result<WriteReport, WriteError> {
	let started = Instant::now();
	let report = aggregator.backfill_all().await?;

	info!(
		upserted = report.upserted,
		deleted = report.deleted,
		elapsed_ms = started.elapsed().as_millis() as u64,
		"Backfill complete"
	);

	Ok(report)
}
