//! Item entity
//!
//! The synchronized entity. Soft deletion sets `deleted_at`; inactive items stay
//! searchable with `is_active = false`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "item")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	pub name: String,
	#[sea_orm(column_type = "Text", nullable)]
	pub description: Option<String>,
	#[sea_orm(column_type = "Text", nullable)]
	pub preview_text: Option<String>,
	pub contributors: Option<Json>, // Vec<Contributor> as JSON
	pub owner_id: Option<i32>,
	pub primary_file_id: Option<i32>,
	pub is_active: bool,
	pub deleted_at: Option<DateTimeUtc>,
	pub created_at: DateTimeUtc,
	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::owner::Entity",
		from = "Column::OwnerId",
		to = "super::owner::Column::Id"
	)]
	Owner,
	#[sea_orm(
		belongs_to = "super::file::Entity",
		from = "Column::PrimaryFileId",
		to = "super::file::Column::Id"
	)]
	PrimaryFile,
}

impl Related<super::owner::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Owner.def()
	}
}

impl Related<super::file::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::PrimaryFile.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}
}
