//! Queue health statistics and recovery
//!
//! - `get_health`: counts, age and cost statistics plus a coarse load label
//! - `cleanup`: purges dead tasks past their TTL and reclaims stuck ones
//! - `emergency_reset`: releases every in-flight task with a fresh retry budget

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use sea_orm::{
	DbBackend, EntityTrait, FromQueryResult, QueryFilter, QueryOrder, Statement, ColumnTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::{AsRefStr, Display};
use tracing::{info, warn};

use super::queue::{QueueStore, RequeueOutcome, RetryPolicy};
use crate::{
	config::SyncConfig,
	error::{Error, Result},
	infra::db::entities::sync_task,
};

const GOOD_BELOW: u64 = 100;
const BUSY_BELOW: u64 = 1_000;
const OVERLOADED_BELOW: u64 = 10_000;

pub const STUCK_TASK_ERROR: &str = "stuck task auto-reset";
pub const EMERGENCY_RESET_ERROR: &str = "emergency reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthLabel {
	Healthy,
	Good,
	Busy,
	Overloaded,
	Critical,
}

impl HealthLabel {
	pub fn from_pending(pending: u64) -> Self {
		match pending {
			0 => Self::Healthy,
			n if n < GOOD_BELOW => Self::Good,
			n if n < BUSY_BELOW => Self::Busy,
			n if n < OVERLOADED_BELOW => Self::Overloaded,
			_ => Self::Critical,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
	pub total: u64,
	pub single_entity: u64,
	pub aggregate: u64,
	pub full_resync: u64,
	pub processing: u64,
	/// Not processing, dead tasks included
	pub pending: u64,
	pub with_retries: u64,
	pub dead: u64,
	pub oldest_queued_at: Option<DateTime<Utc>>,
	pub newest_queued_at: Option<DateTime<Utc>>,
	pub total_estimated_affected: i64,
	/// Age of the current claims, in seconds
	pub avg_processing_secs: Option<f64>,
	pub max_processing_secs: Option<f64>,
	pub pending_by_type: BTreeMap<String, u64>,
	pub label: HealthLabel,
	pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
	pub purged_dead: u64,
	pub reclaimed_stuck: u64,
}

#[derive(Debug, FromQueryResult)]
struct QueueCounts {
	total: i64,
	single_entity: i64,
	aggregate: i64,
	full_resync: i64,
	processing: i64,
	with_retries: i64,
	dead: i64,
	estimated_affected: i64,
}

#[derive(Debug, FromQueryResult)]
struct TypeCount {
	task_type: String,
	count: i64,
}

pub struct HealthMonitor {
	queue: QueueStore,
	stuck_after: Duration,
	dead_task_ttl: Duration,
}

/// `now - window`, or a config error when the window does not fit a timestamp.
fn cutoff(now: DateTime<Utc>, window: Duration, name: &str) -> Result<DateTime<Utc>> {
	chrono::Duration::from_std(window)
		.ok()
		.and_then(|window| now.checked_sub_signed(window))
		.ok_or_else(|| Error::Config(format!("{name} of {}s is out of range", window.as_secs())))
}

impl HealthMonitor {
	pub fn new(queue: QueueStore, config: &SyncConfig) -> Self {
		Self {
			queue,
			stuck_after: config.stuck_after(),
			dead_task_ttl: config.dead_task_ttl(),
		}
	}

	pub async fn get_health(&self) -> Result<HealthReport> {
		let db = self.queue.conn();
		let now = Utc::now();

		let counts = QueueCounts::find_by_statement(Statement::from_string(
			DbBackend::Sqlite,
			r#"
			SELECT
				COUNT(*) AS total,
				COALESCE(SUM(task_type = 'single_entity_update'), 0) AS single_entity,
				COALESCE(SUM(task_type NOT IN ('single_entity_update', 'full_resync')), 0) AS aggregate,
				COALESCE(SUM(task_type = 'full_resync'), 0) AS full_resync,
				COALESCE(SUM(processing = 1), 0) AS processing,
				COALESCE(SUM(retry_count > 0), 0) AS with_retries,
				COALESCE(SUM(retry_count >= max_retries), 0) AS dead,
				COALESCE(SUM(estimated_affected_count), 0) AS estimated_affected
			FROM sync_task
			"#,
		))
		.one(db)
		.await?;

		let pending_by_type = TypeCount::find_by_statement(Statement::from_string(
			DbBackend::Sqlite,
			"SELECT task_type, COUNT(*) AS count FROM sync_task \
			 WHERE processing = 0 GROUP BY task_type ORDER BY task_type",
		))
		.all(db)
		.await?
		.into_iter()
		.map(|row| (row.task_type, row.count.max(0) as u64))
		.collect::<BTreeMap<_, _>>();

		let oldest_queued_at = sync_task::Entity::find()
			.order_by_asc(sync_task::Column::QueuedAt)
			.one(db)
			.await?
			.map(|task| task.queued_at);
		let newest_queued_at = sync_task::Entity::find()
			.order_by_desc(sync_task::Column::QueuedAt)
			.one(db)
			.await?
			.map(|task| task.queued_at);

		let durations = sync_task::Entity::find()
			.filter(sync_task::Column::Processing.eq(true))
			.all(db)
			.await?
			.into_iter()
			.filter_map(|task| task.started_at)
			.map(|started| (now - started).num_milliseconds().max(0) as f64 / 1_000.0)
			.collect::<Vec<_>>();
		let max_processing_secs = durations.iter().copied().reduce(f64::max);
		let avg_processing_secs =
			(!durations.is_empty()).then(|| durations.iter().sum::<f64>() / durations.len() as f64);

		let count = |value: Option<i64>| value.unwrap_or(0).max(0) as u64;
		let total = count(counts.as_ref().map(|c| c.total));
		let processing = count(counts.as_ref().map(|c| c.processing));
		let pending = total.saturating_sub(processing);

		Ok(HealthReport {
			total,
			single_entity: count(counts.as_ref().map(|c| c.single_entity)),
			aggregate: count(counts.as_ref().map(|c| c.aggregate)),
			full_resync: count(counts.as_ref().map(|c| c.full_resync)),
			processing,
			pending,
			with_retries: count(counts.as_ref().map(|c| c.with_retries)),
			dead: count(counts.as_ref().map(|c| c.dead)),
			oldest_queued_at,
			newest_queued_at,
			total_estimated_affected: counts.as_ref().map_or(0, |c| c.estimated_affected),
			avg_processing_secs,
			max_processing_secs,
			pending_by_type,
			label: HealthLabel::from_pending(pending),
			checked_at: now,
		})
	}

	/// Purge dead tasks older than the TTL, then reclaim tasks stuck in processing.
	pub async fn cleanup(&self) -> Result<CleanupReport> {
		let now = Utc::now();

		let dead_cutoff = cutoff(now, self.dead_task_ttl, "dead_task_ttl")?;
		let stuck_cutoff = cutoff(now, self.stuck_after, "stuck_after")?;

		let purged_dead = self.queue.purge_dead(dead_cutoff).await?;
		if purged_dead > 0 {
			info!(purged = purged_dead, "Purged dead sync tasks");
		}

		let mut reclaimed_stuck = 0;
		for task in self.queue.stuck_since(stuck_cutoff).await? {
			warn!(
				task_id = task.id,
				task_type = %task.task_type,
				worker_id = ?task.worker_id,
				started_at = ?task.started_at,
				retry_count = task.retry_count,
				"Reclaiming stuck sync task"
			);

			let outcome = self
				.queue
				.requeue(
					task.id,
					task.worker_id.as_deref(),
					STUCK_TASK_ERROR,
					Some(json!({
						"worker_id": task.worker_id,
						"started_at": task.started_at,
					})),
					RetryPolicy::Increment,
				)
				.await?;
			if outcome != RequeueOutcome::Missing {
				reclaimed_stuck += 1;
			}
		}

		Ok(CleanupReport {
			purged_dead,
			reclaimed_stuck,
		})
	}

	/// Release every in-flight task and reset its retry budget.
	///
	/// Bypasses retry accounting entirely; only meant for a fleet known to be wedged.
	pub async fn emergency_reset(&self) -> Result<u64> {
		let processing = self.queue.processing().await?;
		info!(
			tasks = processing.len(),
			"EMERGENCY RESET: releasing all processing sync tasks"
		);

		let mut reset = 0;
		for task in processing {
			let outcome = self
				.queue
				.requeue(
					task.id,
					task.worker_id.as_deref(),
					EMERGENCY_RESET_ERROR,
					Some(json!({ "worker_id": task.worker_id })),
					RetryPolicy::Reset,
				)
				.await?;
			if outcome != RequeueOutcome::Missing {
				reset += 1;
			}
		}

		info!(reset, "EMERGENCY RESET complete");
		Ok(reset)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn label_thresholds() {
		assert_eq!(HealthLabel::from_pending(0), HealthLabel::Healthy);
		assert_eq!(HealthLabel::from_pending(99), HealthLabel::Good);
		assert_eq!(HealthLabel::from_pending(100), HealthLabel::Busy);
		assert_eq!(HealthLabel::from_pending(9_999), HealthLabel::Overloaded);
		assert_eq!(HealthLabel::from_pending(10_000), HealthLabel::Critical);
		assert_eq!(HealthLabel::Overloaded.to_string(), "overloaded");
	}

	#[test]
	fn oversized_window_is_a_config_error() {
		let now = Utc::now();
		assert!(cutoff(now, Duration::from_secs(60), "stuck_after").is_ok());
		assert!(matches!(
			cutoff(now, Duration::from_secs(10_000_000_000_000), "dead_task_ttl"),
			Err(Error::Config(_))
		));
	}
}
