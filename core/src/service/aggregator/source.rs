//! Source-of-truth reads for the aggregator and the change emitter

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use sea_orm::{
	ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
	FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Statement,
};
use tracing::warn;

use super::SourceReader;
use crate::{
	domain::{
		Contributor, LinkedSummary, MasterKind, OwnerSummary, SourceFile, SourceItem,
		SourceSnapshot,
	},
	infra::db::entities::{
		category, file, item, item_category, item_subcomponent, item_tag, owner, subcomponent, tag,
	},
};

#[derive(Debug, FromQueryResult)]
struct ItemId {
	id: i32,
}

#[derive(Debug, FromQueryResult)]
struct RowCount {
	count: i64,
}

/// `FROM … WHERE …` selecting the non-deleted items that reference one master row,
/// with the master id as the only parameter.
fn referencing_items_clause(kind: MasterKind) -> &'static str {
	match kind {
		MasterKind::Category => {
			"FROM item_category l JOIN item i ON i.id = l.item_id \
			 WHERE l.category_id = ? AND i.deleted_at IS NULL"
		}
		MasterKind::Tag => {
			"FROM item_tag l JOIN item i ON i.id = l.item_id \
			 WHERE l.tag_id = ? AND i.deleted_at IS NULL"
		}
		MasterKind::Subcomponent => {
			"FROM item_subcomponent l JOIN item i ON i.id = l.item_id \
			 WHERE l.subcomponent_id = ? AND i.deleted_at IS NULL"
		}
		MasterKind::Owner => "FROM item i WHERE i.owner_id = ? AND i.deleted_at IS NULL",
		MasterKind::File => "FROM item i WHERE i.primary_file_id = ? AND i.deleted_at IS NULL",
	}
}

/// IDs of every non-deleted item referencing `target_id`, ascending.
pub async fn referencing_item_ids<C: ConnectionTrait>(
	conn: &C,
	kind: MasterKind,
	target_id: i32,
) -> Result<Vec<i32>, DbErr> {
	let rows = ItemId::find_by_statement(Statement::from_sql_and_values(
		DbBackend::Sqlite,
		format!(
			"SELECT DISTINCT i.id AS id {} ORDER BY i.id",
			referencing_items_clause(kind)
		),
		vec![target_id.into()],
	))
	.all(conn)
	.await?;

	Ok(rows.into_iter().map(|row| row.id).collect())
}

pub async fn count_referencing_items<C: ConnectionTrait>(
	conn: &C,
	kind: MasterKind,
	target_id: i32,
) -> Result<u64, DbErr> {
	let row = RowCount::find_by_statement(Statement::from_sql_and_values(
		DbBackend::Sqlite,
		format!(
			"SELECT COUNT(DISTINCT i.id) AS count {}",
			referencing_items_clause(kind)
		),
		vec![target_id.into()],
	))
	.one(conn)
	.await?;

	Ok(row.map_or(0, |row| row.count.max(0) as u64))
}

/// Reads snapshots straight from the catalog tables.
pub struct DbSourceReader {
	db: DatabaseConnection,
}

impl DbSourceReader {
	pub fn new(db: DatabaseConnection) -> Self {
		Self { db }
	}
}

// Link rows joined to their master, grouped per item. Inactive or deleted masters are
// dropped here so projection never has to filter.
macro_rules! linked_summaries {
	($conn:expr, $ids:expr, $link:ident, $master:ident) => {{
		let mut grouped: HashMap<i32, Vec<LinkedSummary>> = HashMap::new();
		let rows = $link::Entity::find()
			.filter($link::Column::ItemId.is_in($ids.iter().copied()))
			.find_also_related($master::Entity)
			.all($conn)
			.await?;

		for (link, master) in rows {
			let Some(master) = master else { continue };
			if !master.is_active || master.deleted_at.is_some() {
				continue;
			}
			grouped.entry(link.item_id).or_default().push(LinkedSummary {
				name: master.name,
				id: master.id,
				slug: master.slug,
			});
		}

		grouped
	}};
}

#[async_trait]
impl SourceReader for DbSourceReader {
	async fn items_referencing(&self, kind: MasterKind, target_id: i32) -> Result<Vec<i32>, DbErr> {
		referencing_item_ids(&self.db, kind, target_id).await
	}

	async fn load_snapshots(&self, ids: &[i32]) -> Result<Vec<SourceSnapshot>, DbErr> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}

		let items = item::Entity::find()
			.filter(item::Column::Id.is_in(ids.iter().copied()))
			.filter(item::Column::DeletedAt.is_null())
			.order_by_asc(item::Column::Id)
			.all(&self.db)
			.await?;
		if items.is_empty() {
			return Ok(Vec::new());
		}
		let live_ids = items.iter().map(|item| item.id).collect::<Vec<_>>();

		let owner_ids = items.iter().filter_map(|item| item.owner_id).collect::<Vec<_>>();
		let owners = owner::Entity::find()
			.filter(owner::Column::Id.is_in(owner_ids))
			.filter(owner::Column::IsActive.eq(true))
			.filter(owner::Column::DeletedAt.is_null())
			.all(&self.db)
			.await?
			.into_iter()
			.map(|owner| {
				(
					owner.id,
					OwnerSummary {
						id: owner.id,
						display_name: owner.display_name,
						email: owner.email,
						avatar_url: owner.avatar_url,
					},
				)
			})
			.collect::<BTreeMap<_, _>>();

		let file_ids = items
			.iter()
			.filter_map(|item| item.primary_file_id)
			.collect::<Vec<_>>();
		let files = file::Entity::find()
			.filter(file::Column::Id.is_in(file_ids))
			.filter(file::Column::IsActive.eq(true))
			.filter(file::Column::DeletedAt.is_null())
			.all(&self.db)
			.await?
			.into_iter()
			.map(|file| {
				(
					file.id,
					SourceFile {
						id: file.id,
						url: file.url,
						cdn_url: file.cdn_url,
						mime_type: file.mime_type,
					},
				)
			})
			.collect::<BTreeMap<_, _>>();

		let mut categories = linked_summaries!(&self.db, live_ids, item_category, category);
		let mut tags = linked_summaries!(&self.db, live_ids, item_tag, tag);
		let mut subcomponents =
			linked_summaries!(&self.db, live_ids, item_subcomponent, subcomponent);

		Ok(items
			.into_iter()
			.map(|model| {
				let contributors = match model.contributors {
					Some(json) => serde_json::from_value::<Vec<Contributor>>(json).unwrap_or_else(|e| {
						warn!(item_id = model.id, error = %e, "Ignoring malformed contributors");
						Vec::new()
					}),
					None => Vec::new(),
				};

				SourceSnapshot {
					owner: model.owner_id.and_then(|id| owners.get(&id).cloned()),
					primary_file: model.primary_file_id.and_then(|id| files.get(&id).cloned()),
					categories: categories.remove(&model.id).unwrap_or_default(),
					tags: tags.remove(&model.id).unwrap_or_default(),
					subcomponents: subcomponents.remove(&model.id).unwrap_or_default(),
					item: SourceItem {
						id: model.id,
						name: model.name,
						description: model.description,
						preview_text: model.preview_text,
						contributors,
						owner_id: model.owner_id,
						primary_file_id: model.primary_file_id,
						is_active: model.is_active,
						created_at: model.created_at,
						updated_at: model.updated_at,
					},
				}
			})
			.collect())
	}

	async fn active_item_ids_after(
		&self,
		after: Option<i32>,
		limit: usize,
	) -> Result<Vec<i32>, DbErr> {
		let mut query = item::Entity::find()
			.select_only()
			.column(item::Column::Id)
			.filter(item::Column::DeletedAt.is_null());
		if let Some(after) = after {
			query = query.filter(item::Column::Id.gt(after));
		}

		query
			.order_by_asc(item::Column::Id)
			.limit(limit as u64)
			.into_tuple::<i32>()
			.all(&self.db)
			.await
	}
}
