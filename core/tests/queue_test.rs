//! Integration tests for the durable task queue
//!
//! Covers enqueue merging, delete dominance, claim ordering, concurrent claimers and
//! the requeue paths.

mod helpers;

use std::collections::HashSet;

use helpers::*;
use pretty_assertions::assert_eq;
use sd_search_sync::{
	domain::{MasterKind, NewTask, Operation, TaskType},
	RequeueOutcome, RetryPolicy,
};
use sea_orm::{ConnectionTrait, DbBackend, Statement};

#[tokio::test]
async fn test_enqueue_merges_pending_duplicates() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	let first = harness.enqueue(NewTask::single(42, Operation::Upsert)).await?;

	// Age the pending row and give it some retry history
	harness
		.queue
		.requeue(first.id, None, "boom", None, RetryPolicy::Increment)
		.await?;
	tokio::time::sleep(std::time::Duration::from_millis(5)).await;

	let second = harness
		.enqueue(NewTask::single(42, Operation::Upsert).with_priority(3))
		.await?;

	assert_eq!(second.id, first.id);
	assert_eq!(harness.queue_len().await?, 1);
	assert_eq!(second.retry_count, 0);
	assert_eq!(second.priority, 3);
	assert!(!second.processing);
	assert!(second.queued_at > first.queued_at);

	// Priority only widens
	let third = harness.enqueue(NewTask::single(42, Operation::Upsert)).await?;
	assert_eq!(third.priority, 3);

	Ok(())
}

#[tokio::test]
async fn test_delete_dominates_upsert() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	harness.enqueue(NewTask::single(1, Operation::Upsert)).await?;
	let merged = harness.enqueue(NewTask::single(1, Operation::Delete)).await?;
	assert_eq!(merged.operation, Operation::Delete);
	assert_eq!(merged.priority, 1);

	// A later upsert never downgrades the pending delete
	let merged = harness.enqueue(NewTask::single(1, Operation::Upsert)).await?;
	assert_eq!(merged.operation, Operation::Delete);
	assert_eq!(harness.queue_len().await?, 1);

	Ok(())
}

#[tokio::test]
async fn test_aggregate_tasks_dedup_by_target() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	let a = harness
		.enqueue(NewTask::aggregate(MasterKind::Category, 7, 10))
		.await?;
	let b = harness
		.enqueue(NewTask::aggregate(MasterKind::Category, 7, 12))
		.await?;
	let other = harness.enqueue(NewTask::aggregate(MasterKind::Tag, 7, 3)).await?;

	assert_eq!(a.id, b.id);
	assert_eq!(b.estimated_affected_count, Some(12));
	assert_ne!(other.id, a.id);
	assert_eq!(harness.queue_len().await?, 2);

	Ok(())
}

#[tokio::test]
async fn test_malformed_enqueue_is_rejected() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	let mut task = NewTask::single(1, Operation::Upsert);
	task.target_id = Some(9);
	assert!(harness.queue.enqueue(&task).await.is_err());

	let mut task = NewTask::aggregate(MasterKind::Owner, 3, 1);
	task.operation = Operation::Delete;
	assert!(harness.queue.enqueue(&task).await.is_err());

	assert_eq!(harness.queue_len().await?, 0);
	Ok(())
}

#[tokio::test]
async fn test_claim_serves_highest_priority_first() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	harness.enqueue(NewTask::single(1, Operation::Upsert)).await?; // 0
	harness
		.enqueue(NewTask::aggregate(MasterKind::Category, 5, 20))
		.await?; // 5
	harness.enqueue(NewTask::single(2, Operation::Delete)).await?; // 1

	let first = harness.queue.claim_batch("w1", 1, 1).await?;
	assert_eq!(first.len(), 1);
	assert_eq!(first[0].task_type, TaskType::ResyncByCategory);
	assert_eq!(first[0].priority, 5);
	assert!(first[0].processing);
	assert_eq!(first[0].worker_id.as_deref(), Some("w1"));

	let rest = harness.queue.claim_batch("w1", 10, 1).await?;
	assert_eq!(
		rest.iter().map(|t| t.priority).collect::<Vec<_>>(),
		vec![1, 0]
	);

	Ok(())
}

#[tokio::test]
async fn test_smaller_aggregate_wins_priority_tie() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	harness
		.enqueue(NewTask::aggregate(MasterKind::Tag, 1, 500))
		.await?;
	harness
		.enqueue(NewTask::aggregate(MasterKind::Tag, 2, 3))
		.await?;

	let claimed = harness.queue.claim_batch("w1", 1, 1).await?;
	assert_eq!(claimed[0].target_id, Some(2));

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claimers_never_share_a_task() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	for id in 0..40 {
		harness.enqueue(NewTask::single(id, Operation::Upsert)).await?;
	}

	let mut handles = Vec::new();
	for worker in 0..4 {
		let queue = harness.queue.clone();
		handles.push(tokio::spawn(async move {
			queue.claim_batch(&format!("w{worker}"), 15, 3).await
		}));
	}

	let mut seen = HashSet::new();
	let mut total = 0;
	for handle in handles {
		for task in handle.await?? {
			total += 1;
			assert!(seen.insert(task.id), "task {} claimed twice", task.id);
		}
	}

	assert_eq!(total, seen.len());
	assert_eq!(harness.queue.processing().await?.len(), total);

	Ok(())
}

#[tokio::test]
async fn test_requeue_increments_and_saturates() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let task = harness.enqueue(NewTask::single(9, Operation::Upsert)).await?;

	for expected in 1..=3 {
		let claimed = harness.queue.claim_batch("w1", 1, 1).await?;
		assert_eq!(claimed.len(), 1);

		let outcome = harness
			.queue
			.requeue(task.id, Some("w1"), "still failing", None, RetryPolicy::Increment)
			.await?;
		assert_eq!(outcome, RequeueOutcome::Reset);

		let stored = harness.queue.get(task.id).await?.expect("task exists");
		assert_eq!(stored.retry_count, expected);
		assert_eq!(stored.last_error.as_deref(), Some("still failing"));
	}

	// Dead: retry budget spent, no longer claimable
	assert!(harness.queue.claim_batch("w1", 10, 1).await?.is_empty());
	let stored = harness.queue.get(task.id).await?.expect("task exists");
	assert!(stored.is_dead());

	// A fresh emission revives it
	let revived = harness.enqueue(NewTask::single(9, Operation::Upsert)).await?;
	assert_eq!(revived.id, task.id);
	assert_eq!(revived.retry_count, 0);
	assert_eq!(harness.queue.claim_batch("w1", 10, 1).await?.len(), 1);

	Ok(())
}

#[tokio::test]
async fn test_requeue_respects_ownership() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let task = harness.enqueue(NewTask::single(3, Operation::Upsert)).await?;
	harness.queue.claim_batch("w1", 1, 1).await?;

	let outcome = harness
		.queue
		.requeue(task.id, Some("w2"), "not mine", None, RetryPolicy::Increment)
		.await?;
	assert_eq!(outcome, RequeueOutcome::Missing);

	let stored = harness.queue.get(task.id).await?.expect("task exists");
	assert!(stored.processing);
	assert_eq!(stored.retry_count, 0);

	Ok(())
}

#[tokio::test]
async fn test_change_during_processing_gets_its_own_row_and_folds_on_failure(
) -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let task = harness.enqueue(NewTask::single(5, Operation::Upsert)).await?;
	harness.queue.claim_batch("w1", 1, 1).await?;

	// The claimed row is not merge target, so a new pending row appears
	let fresh = harness.enqueue(NewTask::single(5, Operation::Delete)).await?;
	assert_ne!(fresh.id, task.id);
	assert_eq!(harness.queue_len().await?, 2);

	let outcome = harness
		.queue
		.requeue(task.id, Some("w1"), "write failed", None, RetryPolicy::Increment)
		.await?;
	assert_eq!(outcome, RequeueOutcome::Folded);
	assert_eq!(harness.queue_len().await?, 1);

	let survivor = harness.queue.get(fresh.id).await?.expect("pending row kept");
	assert_eq!(survivor.operation, Operation::Delete);
	assert!(!survivor.processing);

	Ok(())
}

#[tokio::test]
async fn test_complete_only_removes_own_claims() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let a = harness.enqueue(NewTask::single(1, Operation::Upsert)).await?;
	let b = harness.enqueue(NewTask::single(2, Operation::Upsert)).await?;

	harness.queue.claim_batch("w1", 1, 1).await?;
	harness.queue.claim_batch("w2", 1, 1).await?;

	let removed = harness.queue.complete("w1", &[a.id, b.id]).await?;
	assert_eq!(removed, 1);
	assert_eq!(harness.queue_len().await?, 1);

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueues_share_one_pending_row() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	let mut handles = Vec::new();
	for n in 0..16 {
		let queue = harness.queue.clone();
		let operation = if n == 7 { Operation::Delete } else { Operation::Upsert };
		handles.push(tokio::spawn(async move {
			queue.enqueue(&NewTask::single(11, operation)).await
		}));
	}

	let mut ids = HashSet::new();
	for handle in handles {
		ids.insert(handle.await??.id);
	}

	assert_eq!(ids.len(), 1);
	assert_eq!(harness.queue_len().await?, 1);

	let id = ids.into_iter().next().expect("one id");
	let stored = harness.queue.get(id).await?.expect("pending row");
	assert_eq!(stored.operation, Operation::Delete);
	assert!(!stored.processing);

	Ok(())
}

#[tokio::test]
async fn test_unreadable_claim_is_released_without_aborting_batch() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	harness.enqueue(NewTask::single(1, Operation::Upsert)).await?;
	harness.enqueue(NewTask::single(2, Operation::Upsert)).await?;

	// Highest priority, but its timestamp cannot be decoded once claimed
	harness
		.conn()
		.execute_unprepared(
			"INSERT INTO sync_task (dedup_key, task_type, entity_id, operation, priority, queued_at, max_retries) \
			 VALUES ('corrupt', 'single_entity_update', 99, 'upsert', 9, 'not a date', 3)",
		)
		.await?;

	let claimed = harness.queue.claim_batch("w1", 3, 1).await?;
	assert_eq!(
		claimed.iter().filter_map(|t| t.entity_id).collect::<Vec<_>>(),
		vec![1, 2]
	);

	let row = harness
		.conn()
		.query_one(Statement::from_string(
			DbBackend::Sqlite,
			"SELECT processing, worker_id, retry_count, last_error FROM sync_task WHERE dedup_key = 'corrupt'",
		))
		.await?
		.expect("corrupt row kept");
	assert!(!row.try_get::<bool>("", "processing")?);
	assert_eq!(row.try_get::<Option<String>>("", "worker_id")?, None);
	assert_eq!(row.try_get::<i32>("", "retry_count")?, 1);
	assert!(row
		.try_get::<Option<String>>("", "last_error")?
		.is_some_and(|e| e.starts_with("claim failed")));

	Ok(())
}

#[tokio::test]
async fn test_failed_claim_release_leaves_foreign_claims_alone() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let owned = harness.enqueue(NewTask::single(1, Operation::Upsert)).await?;
	harness.queue.claim_batch("w1", 1, 1).await?;

	// Same dedup key pending behind the claim
	let pending = harness.enqueue(NewTask::single(1, Operation::Upsert)).await?;

	harness
		.queue
		.release_failed_claim(owned.id, "w2", "claim failed: busy")
		.await;

	let stored = harness.queue.get(owned.id).await?.expect("claim kept");
	assert!(stored.processing);
	assert_eq!(stored.worker_id.as_deref(), Some("w1"));
	assert_eq!(stored.retry_count, 0);

	// A pending row is only charged the retry
	harness
		.queue
		.release_failed_claim(pending.id, "w2", "claim failed: busy")
		.await;
	let stored = harness.queue.get(pending.id).await?.expect("pending kept");
	assert!(!stored.processing);
	assert_eq!(stored.retry_count, 1);
	assert_eq!(stored.last_error.as_deref(), Some("claim failed: busy"));

	// Nobody else can pick up w1's task, and w1 still completes it
	let claimed = harness.queue.claim_batch("w3", 10, 1).await?;
	assert_eq!(claimed.iter().map(|t| t.id).collect::<Vec<_>>(), vec![pending.id]);
	assert_eq!(harness.queue.complete("w1", &[owned.id]).await?, 1);

	Ok(())
}

#[tokio::test]
async fn test_schema_caps_retry_count_at_budget() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	let result = harness
		.conn()
		.execute_unprepared(
			"INSERT INTO sync_task (dedup_key, task_type, entity_id, operation, priority, queued_at, retry_count, max_retries) \
			 VALUES ('over', 'single_entity_update', 1, 'upsert', 0, '2025-01-01T00:00:00Z', 4, 3)",
		)
		.await;
	assert!(result.is_err());

	Ok(())
}
