//! Category entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "category")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,
	pub name: String,
	pub slug: Option<String>,
	pub is_active: bool,
	pub deleted_at: Option<DateTimeUtc>,
	pub created_at: DateTimeUtc,
	pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::item_category::Entity")]
	ItemCategorys,
}

impl Related<super::item_category::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::ItemCategorys.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
