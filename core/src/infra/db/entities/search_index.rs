//! Search index entity
//!
//! Denormalized projection of one item. Nested summaries and ID arrays are stored as
//! JSON; `search_document` is mirrored into the `search_index_fts` FTS5 table under
//! the same rowid.

use sea_orm::{entity::prelude::*, ActiveValue::Set};
use serde::{Deserialize, Serialize};

use crate::domain::IndexRow;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "search_index")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub item_id: i32,
	pub name: String,
	#[sea_orm(column_type = "Text", nullable)]
	pub description: Option<String>,
	#[sea_orm(column_type = "Text", nullable)]
	pub preview_text: Option<String>,
	pub is_active: bool,

	pub owner_id: Option<i32>,
	pub primary_file_id: Option<i32>,
	pub owner: Option<Json>,
	pub primary_file: Option<Json>,
	pub contributors: Json,

	pub categories: Json,
	pub tags: Json,
	pub subcomponents: Json,

	pub category_ids: Json,
	pub tag_ids: Json,
	pub subcomponent_ids: Json,
	pub subcomponent_count: i32,

	#[sea_orm(column_type = "Text")]
	pub search_document: String,

	pub item_created_at: DateTimeUtc,
	pub item_updated_at: DateTimeUtc,
	pub last_updated: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
	/// Every column is set: a refresh always replaces the full row.
	pub fn from_row(row: &IndexRow) -> Result<Self, serde_json::Error> {
		Ok(Self {
			item_id: Set(row.item_id),
			name: Set(row.name.clone()),
			description: Set(row.description.clone()),
			preview_text: Set(row.preview_text.clone()),
			is_active: Set(row.is_active),
			owner_id: Set(row.owner_id),
			primary_file_id: Set(row.primary_file_id),
			owner: Set(row.owner.as_ref().map(serde_json::to_value).transpose()?),
			primary_file: Set(row
				.primary_file
				.as_ref()
				.map(serde_json::to_value)
				.transpose()?),
			contributors: Set(serde_json::to_value(&row.contributors)?),
			categories: Set(serde_json::to_value(&row.categories)?),
			tags: Set(serde_json::to_value(&row.tags)?),
			subcomponents: Set(serde_json::to_value(&row.subcomponents)?),
			category_ids: Set(serde_json::to_value(&row.category_ids)?),
			tag_ids: Set(serde_json::to_value(&row.tag_ids)?),
			subcomponent_ids: Set(serde_json::to_value(&row.subcomponent_ids)?),
			subcomponent_count: Set(row.subcomponent_count),
			search_document: Set(row.search_document.clone()),
			item_created_at: Set(row.item_created_at),
			item_updated_at: Set(row.item_updated_at),
			last_updated: Set(row.last_updated),
		})
	}
}

impl TryFrom<Model> for IndexRow {
	type Error = serde_json::Error;

	fn try_from(model: Model) -> Result<Self, Self::Error> {
		Ok(Self {
			item_id: model.item_id,
			name: model.name,
			description: model.description,
			preview_text: model.preview_text,
			is_active: model.is_active,
			owner_id: model.owner_id,
			primary_file_id: model.primary_file_id,
			owner: model.owner.map(serde_json::from_value).transpose()?,
			primary_file: model.primary_file.map(serde_json::from_value).transpose()?,
			contributors: serde_json::from_value(model.contributors)?,
			categories: serde_json::from_value(model.categories)?,
			tags: serde_json::from_value(model.tags)?,
			subcomponents: serde_json::from_value(model.subcomponents)?,
			category_ids: serde_json::from_value(model.category_ids)?,
			tag_ids: serde_json::from_value(model.tag_ids)?,
			subcomponent_ids: serde_json::from_value(model.subcomponent_ids)?,
			subcomponent_count: model.subcomponent_count,
			search_document: model.search_document,
			item_created_at: model.item_created_at,
			item_updated_at: model.item_updated_at,
			last_updated: model.last_updated,
		})
	}
}
