//! Integration tests for re-aggregation into the search index
//!
//! Rows are rebuilt from the catalog tables through the full emit, claim, resolve and
//! write path.

mod helpers;

use std::collections::BTreeSet;

use helpers::*;
use pretty_assertions::assert_eq;
use sd_search_sync::{
	domain::{Contributor, MasterKind, NewTask, Operation, TaskType},
	ops::catalog::{FilePatch, ItemPatch, LabelPatch, NewItem, OwnerPatch},
	LinkTable, SyncConfig,
};

#[tokio::test]
async fn test_upsert_builds_full_row() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let catalog = &harness.catalog;

	let owner = catalog.create_owner("Grace Hopper", Some("grace@example.com")).await?;
	let file = catalog
		.create_file(
			Some("https://origin.example.com/a.png"),
			Some("https://cdn.example.com/a.png"),
			Some("image/png"),
		)
		.await?;
	let sensors = catalog.create_category("Sensors", Some("sensors")).await?;
	let analog = catalog.create_category("Analog", None).await?;
	let retired = catalog.create_category("Retired", None).await?;
	let tag = catalog.create_tag("i2c", None).await?;
	let part = catalog.create_subcomponent("Op-amp", None).await?;

	let item = catalog
		.create_item(NewItem {
			name: "Thermal probe".to_string(),
			description: Some("Measures heat".to_string()),
			preview_text: Some("Rated to 300C".to_string()),
			contributors: vec![Contributor {
				name: "Ada".to_string(),
				role: Some("author".to_string()),
			}],
			owner_id: Some(owner.id),
			primary_file_id: Some(file.id),
			is_active: true,
		})
		.await?;

	for category in [sensors.id, analog.id, retired.id] {
		catalog.link(LinkTable::Category, item.id, category).await?;
	}
	catalog.link(LinkTable::Tag, item.id, tag.id).await?;
	catalog.link(LinkTable::Subcomponent, item.id, part.id).await?;
	catalog
		.update_category(
			retired.id,
			LabelPatch {
				is_active: Some(false),
				..Default::default()
			},
		)
		.await?;

	harness.drain().await?;
	assert_eq!(harness.queue_len().await?, 0);

	let row = harness.index_row(item.id).await?.expect("row indexed");
	assert_eq!(row.name, "Thermal probe");
	assert_eq!(row.owner.as_ref().map(|o| o.display_name.as_str()), Some("Grace Hopper"));
	assert_eq!(
		row.primary_file.as_ref().and_then(|f| f.url.as_deref()),
		Some("https://cdn.example.com/a.png")
	);

	// Inactive categories are left out; arrays are ordered by name
	assert_eq!(
		row.categories.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
		vec!["Analog", "Sensors"]
	);
	assert_eq!(row.category_ids, vec![analog.id, sensors.id]);
	assert_eq!(row.tag_ids, vec![tag.id]);
	assert_eq!(row.subcomponent_ids, vec![part.id]);
	assert_eq!(row.subcomponent_count, 1);
	assert_eq!(
		row.search_document,
		"Thermal probe Measures heat Rated to 300C Ada Analog Sensors i2c Op-amp Grace Hopper"
	);
	assert_eq!(harness.fts_rows(item.id).await?, 1);

	Ok(())
}

#[tokio::test]
async fn test_repeated_upsert_is_byte_identical() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let category = harness.catalog.create_category("Motors", None).await?;
	let ids = harness.create_items(3, "Stepper").await?;
	for id in &ids {
		harness.catalog.link(LinkTable::Category, *id, category.id).await?;
	}

	let aggregator = harness.aggregator();
	let targets = ids.iter().copied().collect::<BTreeSet<_>>();

	aggregator.upsert(&targets).await?;
	let first = harness.index_model(ids[0]).await?.expect("row indexed");

	tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	aggregator.upsert(&targets).await?;
	let second = harness.index_model(ids[0]).await?.expect("row indexed");

	assert_eq!(first, second);
	assert_eq!(harness.fts_rows(ids[0]).await?, 1);

	// A content change moves last_updated
	harness
		.catalog
		.update_item(
			ids[0],
			ItemPatch {
				description: Some(Some("NEMA 17".to_string())),
				..Default::default()
			},
		)
		.await?;
	aggregator.upsert(&targets).await?;
	let third = harness.index_model(ids[0]).await?.expect("row indexed");
	assert!(third.last_updated > second.last_updated);
	assert_eq!(third.description.as_deref(), Some("NEMA 17"));

	Ok(())
}

#[tokio::test]
async fn test_delete_and_soft_delete_remove_rows() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let ids = harness.create_items(3, "Relay").await?;
	harness.drain().await?;
	for id in &ids {
		assert!(harness.index_row(*id).await?.is_some());
	}

	harness.catalog.soft_delete_item(ids[0]).await?;
	harness.catalog.delete_item(ids[1]).await?;

	let pending = harness.queue.list().await?;
	assert!(pending.iter().all(|t| t.operation == Operation::Delete));

	harness.drain().await?;
	assert!(harness.index_row(ids[0]).await?.is_none());
	assert!(harness.index_row(ids[1]).await?.is_none());
	assert!(harness.index_row(ids[2]).await?.is_some());
	assert_eq!(harness.fts_rows(ids[0]).await?, 0);

	// Restoring brings the row back
	harness.catalog.restore_item(ids[0]).await?;
	harness.drain().await?;
	assert!(harness.index_row(ids[0]).await?.is_some());

	Ok(())
}

#[tokio::test]
async fn test_delete_wins_within_a_batch() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let category = harness.catalog.create_category("Valves", None).await?;
	let ids = harness.create_items(2, "Valve").await?;
	for id in &ids {
		harness.catalog.link(LinkTable::Category, *id, category.id).await?;
	}
	harness.drain().await?;

	// Aggregate upsert and single delete for the same item land in one batch
	harness
		.enqueue(NewTask::aggregate(MasterKind::Category, category.id, 2))
		.await?;
	harness.enqueue(NewTask::single(ids[0], Operation::Delete)).await?;

	let reports = harness.drain().await?;
	assert_eq!(reports.len(), 1);
	assert!(harness.index_row(ids[0]).await?.is_none());
	assert!(harness.index_row(ids[1]).await?.is_some());

	Ok(())
}

#[tokio::test]
async fn test_category_rename_resyncs_every_referencing_item() -> anyhow::Result<()> {
	let harness = SyncHarness::with_config(SyncConfig {
		upsert_chunk_size: 16,
		..Default::default()
	})
	.await?;

	let category = harness.catalog.create_category("Actuators", None).await?;
	let ids = harness.create_items(50, "Servo").await?;
	for id in &ids {
		harness.catalog.link(LinkTable::Category, *id, category.id).await?;
	}
	harness.drain().await?;
	assert_eq!(harness.queue_len().await?, 0);

	harness
		.catalog
		.update_category(
			category.id,
			LabelPatch {
				name: Some("Motion control".to_string()),
				..Default::default()
			},
		)
		.await?;

	let queued = harness.queue.list().await?;
	assert_eq!(queued.len(), 1);
	assert_eq!(queued[0].task_type, TaskType::ResyncByCategory);
	assert_eq!(queued[0].target_id, Some(category.id));
	assert_eq!(queued[0].estimated_affected_count, Some(50));
	assert_eq!(queued[0].priority, 5);

	let reports = harness.drain().await?;
	assert_eq!(reports[0].upserted, 50);
	assert_eq!(harness.queue_len().await?, 0);

	for id in &ids {
		let row = harness.index_row(*id).await?.expect("row indexed");
		assert_eq!(row.categories[0].name, "Motion control");
		assert!(row.search_document.contains("Motion control"));
		assert!(!row.search_document.contains("Actuators"));
	}

	Ok(())
}

#[tokio::test]
async fn test_invisible_master_edits_emit_nothing() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let tag = harness.catalog.create_tag("Unused", None).await?;

	// No referencing items: nothing to resync
	harness
		.catalog
		.update_tag(
			tag.id,
			LabelPatch {
				name: Some("Still unused".to_string()),
				..Default::default()
			},
		)
		.await?;
	assert_eq!(harness.queue_len().await?, 0);

	// Referenced, but an empty patch only touches updated_at
	let ids = harness.create_items(1, "Board").await?;
	harness.catalog.link(LinkTable::Tag, ids[0], tag.id).await?;
	harness.drain().await?;
	harness.catalog.update_tag(tag.id, LabelPatch::default()).await?;
	assert_eq!(harness.queue_len().await?, 0);

	Ok(())
}

#[tokio::test]
async fn test_owner_and_file_changes_fan_out() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let owner = harness.catalog.create_owner("Lin", None).await?;
	let file = harness
		.catalog
		.create_file(Some("https://origin.example.com/x.jpg"), None, None)
		.await?;

	let item = harness
		.catalog
		.create_item(NewItem {
			owner_id: Some(owner.id),
			primary_file_id: Some(file.id),
			..NewItem::named("Gearbox")
		})
		.await?;
	harness.drain().await?;

	harness
		.catalog
		.update_owner(
			owner.id,
			OwnerPatch {
				display_name: Some("Lin Wei".to_string()),
				..Default::default()
			},
		)
		.await?;
	harness
		.catalog
		.update_file(
			file.id,
			FilePatch {
				cdn_url: Some(Some("https://cdn.example.com/x.jpg".to_string())),
				..Default::default()
			},
		)
		.await?;

	let types = harness
		.queue
		.list()
		.await?
		.into_iter()
		.map(|t| t.task_type)
		.collect::<BTreeSet<_>>();
	assert_eq!(
		types,
		BTreeSet::from([TaskType::ResyncByOwner, TaskType::ResyncByFile])
	);

	harness.drain().await?;
	let row = harness.index_row(item.id).await?.expect("row indexed");
	assert_eq!(row.owner.map(|o| o.display_name), Some("Lin Wei".to_string()));
	assert_eq!(
		row.primary_file.and_then(|f| f.url),
		Some("https://cdn.example.com/x.jpg".to_string())
	);

	// A soft-deleted owner drops out of the row but the raw reference stays
	harness
		.catalog
		.update_owner(
			owner.id,
			OwnerPatch {
				deleted: Some(true),
				..Default::default()
			},
		)
		.await?;
	harness.drain().await?;
	let row = harness.index_row(item.id).await?.expect("row indexed");
	assert!(row.owner.is_none());
	assert_eq!(row.owner_id, Some(owner.id));

	Ok(())
}

#[tokio::test]
async fn test_hard_deleted_master_refreshes_its_items() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;
	let category = harness.catalog.create_category("Legacy", None).await?;
	let ids = harness.create_items(3, "Fuse").await?;
	for id in &ids {
		harness.catalog.link(LinkTable::Category, *id, category.id).await?;
	}
	harness.drain().await?;

	let queued = harness.catalog.delete_category(category.id).await?;
	assert_eq!(queued, 3);

	harness.drain().await?;
	for id in &ids {
		let row = harness.index_row(*id).await?.expect("row indexed");
		assert!(row.category_ids.is_empty());
		assert!(!row.search_document.contains("Legacy"));
	}

	Ok(())
}

#[tokio::test]
async fn test_suppressed_changes_need_a_full_resync() -> anyhow::Result<()> {
	let harness = SyncHarness::new().await?;

	let ids = {
		let _guard = harness.catalog.emitter().suppress();
		harness.create_items(5, "Imported").await?
	};
	assert_eq!(harness.queue_len().await?, 0);

	harness
		.enqueue(NewTask::full_resync())
		.await?;
	harness.drain().await?;

	for id in &ids {
		assert!(harness.index_row(*id).await?.is_some());
	}

	Ok(())
}
