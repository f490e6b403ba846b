//! Subcomponent entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subcomponent")]
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
	#[sea_orm(has_many = "super::item_subcomponent::Entity")]
	ItemSubcomponents,
}

impl Related<super::item_subcomponent::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::ItemSubcomponents.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
