//! File (asset) entity
//!
//! `cdn_url` is filled in once the asset has been pushed to the CDN and is preferred
//! over the raw `url` wherever both exist.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	pub url: Option<String>,
	pub cdn_url: Option<String>,
	pub mime_type: Option<String>,
	pub is_active: bool,
	pub deleted_at: Option<DateTimeUtc>,
	pub created_at: DateTimeUtc,
	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::item::Entity")]
	Items,
}

impl Related<super::item::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Items.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
