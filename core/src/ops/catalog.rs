//! Catalog writes with change emission
//!
//! Each write opens a transaction holding the write lock, performs the mutation, calls the matching
//! [`ChangeEmitter`] hook on the same transaction and commits. A failed enqueue rolls
//! the mutation back, so a committed change always has its sync task.

use chrono::Utc;
use sea_orm::{
	sea_query::OnConflict,
	ActiveModelTrait,
	ActiveValue::{NotSet, Set, Unchanged},
	ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
	domain::Contributor,
	error::{Error, Result},
	infra::db::{
		begin_write,
		entities::{
			category, file, item, item_category, item_subcomponent, item_tag, owner, subcomponent,
			tag,
		},
	},
	service::emitter::{ChangeEmitter, ItemChange, LinkChange, LinkTable},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
	pub name: String,
	pub description: Option<String>,
	pub preview_text: Option<String>,
	pub contributors: Vec<Contributor>,
	pub owner_id: Option<i32>,
	pub primary_file_id: Option<i32>,
	pub is_active: bool,
}

impl NewItem {
	pub fn named(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			is_active: true,
			..Default::default()
		}
	}
}

/// Partial item update. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
	pub name: Option<String>,
	pub description: Option<Option<String>>,
	pub preview_text: Option<Option<String>>,
	pub contributors: Option<Vec<Contributor>>,
	pub owner_id: Option<Option<i32>>,
	pub primary_file_id: Option<Option<i32>>,
	pub is_active: Option<bool>,
}

/// Partial update of a category, tag or sub-component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPatch {
	pub name: Option<String>,
	pub slug: Option<Option<String>>,
	pub is_active: Option<bool>,
	/// `Some(true)` soft-deletes, `Some(false)` restores
	pub deleted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerPatch {
	pub display_name: Option<String>,
	pub email: Option<Option<String>>,
	pub avatar_url: Option<Option<String>>,
	pub is_active: Option<bool>,
	pub deleted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
	pub url: Option<Option<String>>,
	pub cdn_url: Option<Option<String>>,
	pub mime_type: Option<Option<String>>,
	pub is_active: Option<bool>,
	pub deleted: Option<bool>,
}

fn contributors_json(contributors: &[Contributor]) -> Result<Option<serde_json::Value>> {
	if contributors.is_empty() {
		return Ok(None);
	}
	Ok(Some(serde_json::to_value(contributors)?))
}

/// New `deleted_at` for a soft-delete flag, keeping the original timestamp when the row
/// is already deleted.
fn deleted_at(
	current: Option<chrono::DateTime<Utc>>,
	deleted: Option<bool>,
	now: chrono::DateTime<Utc>,
) -> Option<chrono::DateTime<Utc>> {
	match deleted {
		Some(true) => current.or(Some(now)),
		Some(false) => None,
		None => current,
	}
}

/// Create, update and hard-delete operations for a category-like master table.
macro_rules! labelled_master_ops {
	($module:ident, $create:ident, $update:ident, $delete:ident) => {
		pub async fn $create(&self, name: &str, slug: Option<&str>) -> Result<$module::Model> {
			let now = Utc::now();
			// A fresh master row has no references yet, nothing to emit
			Ok($module::ActiveModel {
				id: NotSet,
				name: Set(name.to_owned()),
				slug: Set(slug.map(str::to_owned)),
				is_active: Set(true),
				deleted_at: Set(None),
				created_at: Set(now),
				updated_at: Set(now),
			}
			.insert(&self.db)
			.await?)
		}

		pub async fn $update(&self, id: i32, patch: LabelPatch) -> Result<$module::Model> {
			let now = Utc::now();
			let txn = begin_write(&self.db).await?;

			let before = $module::Entity::find_by_id(id)
				.one(&txn)
				.await?
				.ok_or(Error::NotFound {
					entity: stringify!($module),
					id,
				})?;

			let mut active: $module::ActiveModel = before.clone().into();
			if let Some(name) = patch.name {
				active.name = Set(name);
			}
			if let Some(slug) = patch.slug {
				active.slug = Set(slug);
			}
			if let Some(is_active) = patch.is_active {
				active.is_active = Set(is_active);
			}
			active.deleted_at = Set(deleted_at(before.deleted_at, patch.deleted, now));
			active.updated_at = Set(now);

			let after = active.update(&txn).await?;
			self.emitter.on_master_updated(&txn, &before, &after).await?;
			txn.commit().await?;

			Ok(after)
		}

		/// Hard delete. Referencing items are queued for a refresh before their link rows
		/// cascade away. Returns how many items were queued.
		pub async fn $delete(&self, id: i32) -> Result<usize> {
			let txn = begin_write(&self.db).await?;

			let record = $module::Entity::find_by_id(id)
				.one(&txn)
				.await?
				.ok_or(Error::NotFound {
					entity: stringify!($module),
					id,
				})?;

			let queued = self.emitter.on_master_deleting(&txn, &record).await?;
			$module::Entity::delete_by_id(id).exec(&txn).await?;
			txn.commit().await?;

			debug!(entity = stringify!($module), id, queued = queued.len(), "Deleted master row");
			Ok(queued.len())
		}
	};
}

#[derive(Clone)]
pub struct Catalog {
	db: DatabaseConnection,
	emitter: ChangeEmitter,
}

impl Catalog {
	pub fn new(db: DatabaseConnection, emitter: ChangeEmitter) -> Self {
		Self { db, emitter }
	}

	pub fn emitter(&self) -> &ChangeEmitter {
		&self.emitter
	}

	pub async fn create_item(&self, new: NewItem) -> Result<item::Model> {
		let now = Utc::now();
		let txn = begin_write(&self.db).await?;

		let model = item::ActiveModel {
			id: NotSet,
			name: Set(new.name),
			description: Set(new.description),
			preview_text: Set(new.preview_text),
			contributors: Set(contributors_json(&new.contributors)?),
			owner_id: Set(new.owner_id),
			primary_file_id: Set(new.primary_file_id),
			is_active: Set(new.is_active),
			deleted_at: Set(None),
			created_at: Set(now),
			updated_at: Set(now),
		}
		.insert(&txn)
		.await?;

		self.emitter
			.on_item_change(&txn, ItemChange::Inserted(model.id))
			.await?;
		txn.commit().await?;

		Ok(model)
	}

	pub async fn update_item(&self, id: i32, patch: ItemPatch) -> Result<item::Model> {
		self.modify_item(id, |active| {
			if let Some(name) = patch.name {
				active.name = Set(name);
			}
			if let Some(description) = patch.description {
				active.description = Set(description);
			}
			if let Some(preview_text) = patch.preview_text {
				active.preview_text = Set(preview_text);
			}
			if let Some(contributors) = patch.contributors {
				active.contributors = Set(contributors_json(&contributors)?);
			}
			if let Some(owner_id) = patch.owner_id {
				active.owner_id = Set(owner_id);
			}
			if let Some(primary_file_id) = patch.primary_file_id {
				active.primary_file_id = Set(primary_file_id);
			}
			if let Some(is_active) = patch.is_active {
				active.is_active = Set(is_active);
			}
			Ok(())
		})
		.await
	}

	/// Set `deleted_at`. The emitted task removes the item's index row.
	pub async fn soft_delete_item(&self, id: i32) -> Result<item::Model> {
		let now = Utc::now();
		self.modify_item(id, |active| {
			if let Unchanged(None) | Set(None) = active.deleted_at {
				active.deleted_at = Set(Some(now));
			}
			Ok(())
		})
		.await
	}

	pub async fn restore_item(&self, id: i32) -> Result<item::Model> {
		self.modify_item(id, |active| {
			active.deleted_at = Set(None);
			Ok(())
		})
		.await
	}

	pub async fn delete_item(&self, id: i32) -> Result<()> {
		let txn = begin_write(&self.db).await?;

		let result = item::Entity::delete_by_id(id).exec(&txn).await?;
		if result.rows_affected == 0 {
			return Err(Error::NotFound { entity: "item", id });
		}

		self.emitter
			.on_item_change(&txn, ItemChange::Deleted(id))
			.await?;
		txn.commit().await?;

		Ok(())
	}

	async fn modify_item<F>(&self, id: i32, apply: F) -> Result<item::Model>
	where
		F: FnOnce(&mut item::ActiveModel) -> Result<()>,
	{
		let txn = begin_write(&self.db).await?;

		let before = item::Entity::find_by_id(id)
			.one(&txn)
			.await?
			.ok_or(Error::NotFound { entity: "item", id })?;

		let mut active: item::ActiveModel = before.clone().into();
		apply(&mut active)?;
		active.updated_at = Set(Utc::now());

		let after = active.update(&txn).await?;
		self.emitter
			.on_item_change(&txn, ItemChange::between(&before, &after))
			.await?;
		txn.commit().await?;

		Ok(after)
	}

	/// Link an item to a category, tag or sub-component. Returns false (and emits
	/// nothing) when the link already existed.
	pub async fn link(&self, table: LinkTable, item_id: i32, linked_id: i32) -> Result<bool> {
		let now = Utc::now();
		let txn = begin_write(&self.db).await?;

		let inserted = match table {
			LinkTable::Category => {
				item_category::Entity::insert(item_category::ActiveModel {
					item_id: Set(item_id),
					category_id: Set(linked_id),
					created_at: Set(now),
				})
				.on_conflict(
					OnConflict::columns([
						item_category::Column::ItemId,
						item_category::Column::CategoryId,
					])
					.do_nothing()
					.to_owned(),
				)
				.exec_without_returning(&txn)
				.await?
			}
			LinkTable::Tag => {
				item_tag::Entity::insert(item_tag::ActiveModel {
					item_id: Set(item_id),
					tag_id: Set(linked_id),
					created_at: Set(now),
				})
				.on_conflict(
					OnConflict::columns([item_tag::Column::ItemId, item_tag::Column::TagId])
						.do_nothing()
						.to_owned(),
				)
				.exec_without_returning(&txn)
				.await?
			}
			LinkTable::Subcomponent => {
				item_subcomponent::Entity::insert(item_subcomponent::ActiveModel {
					item_id: Set(item_id),
					subcomponent_id: Set(linked_id),
					created_at: Set(now),
				})
				.on_conflict(
					OnConflict::columns([
						item_subcomponent::Column::ItemId,
						item_subcomponent::Column::SubcomponentId,
					])
					.do_nothing()
					.to_owned(),
				)
				.exec_without_returning(&txn)
				.await?
			}
		};

		if inserted == 0 {
			return Ok(false);
		}

		self.emitter
			.on_link_change(
				&txn,
				LinkChange {
					table,
					item_id,
					linked_id,
				},
			)
			.await?;
		txn.commit().await?;

		Ok(true)
	}

	/// Returns false (and emits nothing) when there was no such link.
	pub async fn unlink(&self, table: LinkTable, item_id: i32, linked_id: i32) -> Result<bool> {
		let txn = begin_write(&self.db).await?;

		let removed = match table {
			LinkTable::Category => {
				item_category::Entity::delete_many()
					.filter(item_category::Column::ItemId.eq(item_id))
					.filter(item_category::Column::CategoryId.eq(linked_id))
					.exec(&txn)
					.await?
			}
			LinkTable::Tag => {
				item_tag::Entity::delete_many()
					.filter(item_tag::Column::ItemId.eq(item_id))
					.filter(item_tag::Column::TagId.eq(linked_id))
					.exec(&txn)
					.await?
			}
			LinkTable::Subcomponent => {
				item_subcomponent::Entity::delete_many()
					.filter(item_subcomponent::Column::ItemId.eq(item_id))
					.filter(item_subcomponent::Column::SubcomponentId.eq(linked_id))
					.exec(&txn)
					.await?
			}
		}
		.rows_affected;

		if removed == 0 {
			return Ok(false);
		}

		self.emitter
			.on_link_change(
				&txn,
				LinkChange {
					table,
					item_id,
					linked_id,
				},
			)
			.await?;
		txn.commit().await?;

		Ok(true)
	}

	labelled_master_ops!(category, create_category, update_category, delete_category);
	labelled_master_ops!(tag, create_tag, update_tag, delete_tag);
	labelled_master_ops!(
		subcomponent,
		create_subcomponent,
		update_subcomponent,
		delete_subcomponent
	);

	pub async fn create_owner(&self, display_name: &str, email: Option<&str>) -> Result<owner::Model> {
		let now = Utc::now();
		Ok(owner::ActiveModel {
			id: NotSet,
			display_name: Set(display_name.to_owned()),
			email: Set(email.map(str::to_owned)),
			avatar_url: Set(None),
			is_active: Set(true),
			deleted_at: Set(None),
			created_at: Set(now),
			updated_at: Set(now),
		}
		.insert(&self.db)
		.await?)
	}

	pub async fn update_owner(&self, id: i32, patch: OwnerPatch) -> Result<owner::Model> {
		let now = Utc::now();
		let txn = begin_write(&self.db).await?;

		let before = owner::Entity::find_by_id(id)
			.one(&txn)
			.await?
			.ok_or(Error::NotFound { entity: "owner", id })?;

		let mut active: owner::ActiveModel = before.clone().into();
		if let Some(display_name) = patch.display_name {
			active.display_name = Set(display_name);
		}
		if let Some(email) = patch.email {
			active.email = Set(email);
		}
		if let Some(avatar_url) = patch.avatar_url {
			active.avatar_url = Set(avatar_url);
		}
		if let Some(is_active) = patch.is_active {
			active.is_active = Set(is_active);
		}
		active.deleted_at = Set(deleted_at(before.deleted_at, patch.deleted, now));
		active.updated_at = Set(now);

		let after = active.update(&txn).await?;
		self.emitter.on_master_updated(&txn, &before, &after).await?;
		txn.commit().await?;

		Ok(after)
	}

	/// Hard delete. Items keep existing with `owner_id` nulled by the foreign key.
	pub async fn delete_owner(&self, id: i32) -> Result<usize> {
		let txn = begin_write(&self.db).await?;

		let record = owner::Entity::find_by_id(id)
			.one(&txn)
			.await?
			.ok_or(Error::NotFound { entity: "owner", id })?;

		let queued = self.emitter.on_master_deleting(&txn, &record).await?;
		owner::Entity::delete_by_id(id).exec(&txn).await?;
		txn.commit().await?;

		Ok(queued.len())
	}

	pub async fn create_file(
		&self,
		url: Option<&str>,
		cdn_url: Option<&str>,
		mime_type: Option<&str>,
	) -> Result<file::Model> {
		let now = Utc::now();
		Ok(file::ActiveModel {
			id: NotSet,
			url: Set(url.map(str::to_owned)),
			cdn_url: Set(cdn_url.map(str::to_owned)),
			mime_type: Set(mime_type.map(str::to_owned)),
			is_active: Set(true),
			deleted_at: Set(None),
			created_at: Set(now),
			updated_at: Set(now),
		}
		.insert(&self.db)
		.await?)
	}

	pub async fn update_file(&self, id: i32, patch: FilePatch) -> Result<file::Model> {
		let now = Utc::now();
		let txn = begin_write(&self.db).await?;

		let before = file::Entity::find_by_id(id)
			.one(&txn)
			.await?
			.ok_or(Error::NotFound { entity: "file", id })?;

		let mut active: file::ActiveModel = before.clone().into();
		if let Some(url) = patch.url {
			active.url = Set(url);
		}
		if let Some(cdn_url) = patch.cdn_url {
			active.cdn_url = Set(cdn_url);
		}
		if let Some(mime_type) = patch.mime_type {
			active.mime_type = Set(mime_type);
		}
		if let Some(is_active) = patch.is_active {
			active.is_active = Set(is_active);
		}
		active.deleted_at = Set(deleted_at(before.deleted_at, patch.deleted, now));
		active.updated_at = Set(now);

		let after = active.update(&txn).await?;
		self.emitter.on_master_updated(&txn, &before, &after).await?;
		txn.commit().await?;

		Ok(after)
	}

	pub async fn delete_file(&self, id: i32) -> Result<usize> {
		let txn = begin_write(&self.db).await?;

		let record = file::Entity::find_by_id(id)
			.one(&txn)
			.await?
			.ok_or(Error::NotFound { entity: "file", id })?;

		let queued = self.emitter.on_master_deleting(&txn, &record).await?;
		file::Entity::delete_by_id(id).exec(&txn).await?;
		txn.commit().await?;

		Ok(queued.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn soft_delete_flag_keeps_first_timestamp() {
		let first = Utc::now() - chrono::Duration::hours(1);
		let now = Utc::now();

		assert_eq!(deleted_at(None, Some(true), now), Some(now));
		assert_eq!(deleted_at(Some(first), Some(true), now), Some(first));
		assert_eq!(deleted_at(Some(first), Some(false), now), None);
		assert_eq!(deleted_at(Some(first), None, now), Some(first));
	}

	#[test]
	fn empty_contributors_are_stored_as_null() {
		assert_eq!(contributors_json(&[]).ok().flatten(), None);
		let json = contributors_json(&[Contributor {
			name: "Ada".to_string(),
			role: None,
		}])
		.ok()
		.flatten();
		assert_eq!(json, Some(serde_json::json!([{ "name": "Ada" }])));
	}
}
