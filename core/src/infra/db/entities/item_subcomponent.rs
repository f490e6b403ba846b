//! Item <-> subcomponent link table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "item_subcomponent")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub item_id: i32,
	#[sea_orm(primary_key, auto_increment = false)]
	pub subcomponent_id: i32,
	pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::item::Entity",
		from = "Column::ItemId",
		to = "super::item::Column::Id",
		on_delete = "Cascade"
	)]
	Item,
	#[sea_orm(
		belongs_to = "super::subcomponent::Entity",
		from = "Column::SubcomponentId",
		to = "super::subcomponent::Column::Id",
		on_delete = "Cascade"
	)]
	Subcomponent,
}

impl Related<super::item::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Item.def()
	}
}

impl Related<super::subcomponent::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Subcomponent.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
