//! Change emitter
//!
//! Application-level replacement for row triggers: every committed catalog mutation
//! calls exactly one hook here, which turns it into at most one enqueue-or-merge.
//! Hooks take any [`ConnectionTrait`], so the enqueue can ride in the mutation's own
//! transaction and commits or rolls back with it.
//!
//! Emission can be switched off globally (`emitter.enabled`) or suppressed for a scope
//! with [`ChangeEmitter::suppress`], for bulk imports and replication catch-up. A
//! suppressed scope is normally followed by a full resync.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use sea_orm::ConnectionTrait;
use serde_json::json;
use tracing::debug;

use super::{
	aggregator::{count_referencing_items, referencing_item_ids},
	queue::QueueStore,
};
use crate::{
	config::SyncConfig,
	domain::{MasterKind, NewTask, Operation, Task},
	error::QueueError,
	infra::db::entities::{category, file, item, owner, subcomponent, tag},
};

/// A mutation of the `item` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemChange {
	Inserted(i32),
	/// `soft_deleted` is set only when `deleted_at` went from unset to set
	Updated { id: i32, soft_deleted: bool },
	Deleted(i32),
}

impl ItemChange {
	/// Classify an update from the row before and after.
	pub fn between(before: &item::Model, after: &item::Model) -> Self {
		Self::Updated {
			id: after.id,
			soft_deleted: !before.is_deleted() && after.is_deleted(),
		}
	}

	pub fn item_id(&self) -> i32 {
		match *self {
			Self::Inserted(id) | Self::Updated { id, .. } | Self::Deleted(id) => id,
		}
	}

	pub fn operation(&self) -> Operation {
		match self {
			Self::Deleted(_)
			| Self::Updated {
				soft_deleted: true, ..
			} => Operation::Delete,
			_ => Operation::Upsert,
		}
	}

	fn trigger(&self) -> &'static str {
		match self {
			Self::Inserted(_) => "item_inserted",
			Self::Updated { .. } => "item_updated",
			Self::Deleted(_) => "item_deleted",
		}
	}
}

/// Many-to-many link tables owned by an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTable {
	Category,
	Tag,
	Subcomponent,
}

impl LinkTable {
	pub fn table_name(self) -> &'static str {
		match self {
			Self::Category => "item_category",
			Self::Tag => "item_tag",
			Self::Subcomponent => "item_subcomponent",
		}
	}
}

/// An insert, update or delete of a link row. Only the owning item is affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkChange {
	pub table: LinkTable,
	pub item_id: i32,
	pub linked_id: i32,
}

/// A shared reference row whose edits fan out to every item referencing it.
pub trait MasterRecord {
	const KIND: MasterKind;

	fn id(&self) -> i32;

	/// Whether any field that shows up in an index row differs.
	fn visible_fields_changed(&self, other: &Self) -> bool;
}

macro_rules! labelled_master {
	($module:ident, $kind:expr) => {
		impl MasterRecord for $module::Model {
			const KIND: MasterKind = $kind;

			fn id(&self) -> i32 {
				self.id
			}

			fn visible_fields_changed(&self, other: &Self) -> bool {
				self.name != other.name
					|| self.slug != other.slug
					|| self.is_active != other.is_active
					|| self.deleted_at != other.deleted_at
			}
		}
	};
}

labelled_master!(category, MasterKind::Category);
labelled_master!(tag, MasterKind::Tag);
labelled_master!(subcomponent, MasterKind::Subcomponent);

impl MasterRecord for owner::Model {
	const KIND: MasterKind = MasterKind::Owner;

	fn id(&self) -> i32 {
		self.id
	}

	fn visible_fields_changed(&self, other: &Self) -> bool {
		self.display_name != other.display_name
			|| self.email != other.email
			|| self.avatar_url != other.avatar_url
			|| self.is_active != other.is_active
			|| self.deleted_at != other.deleted_at
	}
}

impl MasterRecord for file::Model {
	const KIND: MasterKind = MasterKind::File;

	fn id(&self) -> i32 {
		self.id
	}

	fn visible_fields_changed(&self, other: &Self) -> bool {
		self.url != other.url
			|| self.cdn_url != other.cdn_url
			|| self.mime_type != other.mime_type
			|| self.is_active != other.is_active
			|| self.deleted_at != other.deleted_at
	}
}

/// Keeps emission suppressed until dropped.
#[must_use = "emission resumes as soon as the guard is dropped"]
pub struct SuppressionGuard {
	counter: Arc<AtomicUsize>,
}

impl Drop for SuppressionGuard {
	fn drop(&mut self) {
		self.counter.fetch_sub(1, Ordering::SeqCst);
	}
}

#[derive(Clone)]
pub struct ChangeEmitter {
	enabled: bool,
	max_retries: i32,
	suppressed: Arc<AtomicUsize>,
}

impl ChangeEmitter {
	pub fn new(config: &SyncConfig) -> Self {
		Self {
			enabled: config.emitter.enabled,
			max_retries: config.max_retries,
			suppressed: Arc::new(AtomicUsize::new(0)),
		}
	}

	pub fn suppress(&self) -> SuppressionGuard {
		self.suppressed.fetch_add(1, Ordering::SeqCst);
		SuppressionGuard {
			counter: self.suppressed.clone(),
		}
	}

	pub fn is_active(&self) -> bool {
		self.enabled && self.suppressed.load(Ordering::SeqCst) == 0
	}

	fn skip(&self, what: &str) -> bool {
		if self.is_active() {
			return false;
		}
		debug!(what, "Change emission suppressed");
		true
	}

	async fn enqueue<C: ConnectionTrait>(&self, conn: &C, task: NewTask) -> Result<Task, QueueError> {
		QueueStore::enqueue_on(conn, &task.with_max_retries(self.max_retries)).await
	}

	pub async fn on_item_change<C: ConnectionTrait>(
		&self,
		conn: &C,
		change: ItemChange,
	) -> Result<Option<Task>, QueueError> {
		if self.skip(change.trigger()) {
			return Ok(None);
		}

		let task = NewTask::single(change.item_id(), change.operation())
			.with_metadata(json!({ "trigger": change.trigger() }));

		self.enqueue(conn, task).await.map(Some)
	}

	pub async fn on_link_change<C: ConnectionTrait>(
		&self,
		conn: &C,
		change: LinkChange,
	) -> Result<Option<Task>, QueueError> {
		if self.skip(change.table.table_name()) {
			return Ok(None);
		}

		let task = NewTask::single(change.item_id, Operation::Upsert).with_metadata(json!({
			"trigger": "link_changed",
			"table": change.table.table_name(),
			"linked_id": change.linked_id,
		}));

		self.enqueue(conn, task).await.map(Some)
	}

	/// Enqueue an aggregate resync when a user-visible field of a master row changed and
	/// at least one non-deleted item references it.
	pub async fn on_master_updated<C, M>(
		&self,
		conn: &C,
		before: &M,
		after: &M,
	) -> Result<Option<Task>, QueueError>
	where
		C: ConnectionTrait,
		M: MasterRecord + Sync,
	{
		if !before.visible_fields_changed(after) || self.skip(M::KIND.as_ref()) {
			return Ok(None);
		}

		let affected = count_referencing_items(conn, M::KIND, after.id()).await?;
		if affected == 0 {
			debug!(
				kind = %M::KIND,
				target_id = after.id(),
				"No items reference changed master row"
			);
			return Ok(None);
		}

		let task = NewTask::aggregate(M::KIND, after.id(), affected as i64)
			.with_metadata(json!({ "trigger": "master_updated", "kind": M::KIND }));

		self.enqueue(conn, task).await.map(Some)
	}

	/// Hard deletes cascade through link rows without any link hook firing, and an
	/// aggregate task resolved after the delete would find nothing. Must therefore run
	/// before the delete: it enqueues a single-entity refresh for every referencing item.
	pub async fn on_master_deleting<C, M>(&self, conn: &C, record: &M) -> Result<Vec<Task>, QueueError>
	where
		C: ConnectionTrait,
		M: MasterRecord + Sync,
	{
		if self.skip(M::KIND.as_ref()) {
			return Ok(Vec::new());
		}

		let mut tasks = Vec::new();
		for item_id in referencing_item_ids(conn, M::KIND, record.id()).await? {
			let task = NewTask::single(item_id, Operation::Upsert).with_metadata(json!({
				"trigger": "master_deleted",
				"kind": M::KIND,
				"target_id": record.id(),
			}));
			tasks.push(self.enqueue(conn, task).await?);
		}

		Ok(tasks)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	fn item(deleted: bool) -> item::Model {
		let now = Utc::now();
		item::Model {
			id: 1,
			name: "a".to_string(),
			description: None,
			preview_text: None,
			contributors: None,
			owner_id: None,
			primary_file_id: None,
			is_active: true,
			deleted_at: deleted.then_some(now),
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn soft_delete_transition_is_a_delete() {
		assert_eq!(
			ItemChange::between(&item(false), &item(true)).operation(),
			Operation::Delete
		);
		// Already deleted rows edited again, and restores, are upserts
		assert_eq!(
			ItemChange::between(&item(true), &item(true)).operation(),
			Operation::Upsert
		);
		assert_eq!(
			ItemChange::between(&item(true), &item(false)).operation(),
			Operation::Upsert
		);
		assert_eq!(ItemChange::Deleted(1).operation(), Operation::Delete);
	}

	#[test]
	fn visible_fields_only() {
		let now = Utc::now();
		let before = category::Model {
			id: 4,
			name: "Sensors".to_string(),
			slug: Some("sensors".to_string()),
			is_active: true,
			deleted_at: None,
			created_at: now,
			updated_at: now,
		};

		let mut touched = before.clone();
		touched.updated_at = now + chrono::Duration::seconds(5);
		assert!(!before.visible_fields_changed(&touched));

		let mut renamed = before.clone();
		renamed.name = "Sensor modules".to_string();
		assert!(before.visible_fields_changed(&renamed));
	}

	#[test]
	fn suppression_is_scoped() {
		let emitter = ChangeEmitter::new(&SyncConfig::default());
		assert!(emitter.is_active());

		let outer = emitter.suppress();
		let inner = emitter.clone().suppress();
		drop(outer);
		assert!(!emitter.is_active());
		drop(inner);
		assert!(emitter.is_active());
	}
}
