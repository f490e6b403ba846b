//! Index store writes
//!
//! `search_index` and its FTS5 shadow `search_index_fts` are always written together in
//! one transaction, with the FTS rowid equal to the item id.

use async_trait::async_trait;
use sea_orm::{
	sea_query::{Expr, OnConflict, SimpleExpr},
	ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, EntityTrait,
	IdenStatic, Iterable, Statement, TransactionTrait, Value,
};

use super::IndexWriter;
use crate::{domain::IndexRow, infra::db::entities::search_index};

/// `last_updated` only moves when some projected column actually changed, so
/// refreshing an unchanged item leaves its row byte-identical.
fn last_updated_expr() -> SimpleExpr {
	let unchanged = search_index::Column::iter()
		.filter(|column| {
			!matches!(
				column,
				search_index::Column::ItemId | search_index::Column::LastUpdated
			)
		})
		.map(|column| {
			let name = column.as_str();
			format!("search_index.{name} IS excluded.{name}")
		})
		.collect::<Vec<_>>()
		.join(" AND ");

	Expr::cust(format!(
		"CASE WHEN {unchanged} THEN search_index.last_updated ELSE excluded.last_updated END"
	))
}

fn placeholders(count: usize) -> String {
	vec!["?"; count].join(", ")
}

/// Writes the index on the SeaORM connection.
pub struct DbIndexStore {
	db: DatabaseConnection,
}

impl DbIndexStore {
	pub fn new(db: DatabaseConnection) -> Self {
		Self { db }
	}

	async fn remove_in(txn: &DatabaseTransaction, ids: &[i32]) -> Result<u64, DbErr> {
		let values = ids.iter().map(|id| Value::from(*id)).collect::<Vec<_>>();

		let removed = txn
			.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				format!(
					"DELETE FROM search_index WHERE item_id IN ({})",
					placeholders(ids.len())
				),
				values.clone(),
			))
			.await?
			.rows_affected();

		txn.execute(Statement::from_sql_and_values(
			DbBackend::Sqlite,
			format!(
				"DELETE FROM search_index_fts WHERE rowid IN ({})",
				placeholders(ids.len())
			),
			values,
		))
		.await?;

		Ok(removed)
	}
}

#[async_trait]
impl IndexWriter for DbIndexStore {
	async fn write_chunk(&self, rows: &[IndexRow], remove: &[i32]) -> Result<u64, DbErr> {
		if rows.is_empty() && remove.is_empty() {
			return Ok(0);
		}

		let models = rows
			.iter()
			.map(search_index::ActiveModel::from_row)
			.collect::<Result<Vec<_>, _>>()
			.map_err(|e| DbErr::Json(e.to_string()))?;

		let txn = self.db.begin().await?;

		if !models.is_empty() {
			let mut on_conflict = OnConflict::column(search_index::Column::ItemId);
			on_conflict
				.update_columns(search_index::Column::iter().filter(|column| {
					!matches!(
						column,
						search_index::Column::ItemId | search_index::Column::LastUpdated
					)
				}))
				.value(search_index::Column::LastUpdated, last_updated_expr());

			search_index::Entity::insert_many(models)
				.on_conflict(on_conflict)
				.exec_without_returning(&txn)
				.await?;

			let ids = rows.iter().map(|row| Value::from(row.item_id)).collect::<Vec<_>>();
			txn.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				format!(
					"DELETE FROM search_index_fts WHERE rowid IN ({})",
					placeholders(ids.len())
				),
				ids,
			))
			.await?;

			let mut values = Vec::with_capacity(rows.len() * 2);
			for row in rows {
				values.push(Value::from(row.item_id));
				values.push(Value::from(row.search_document.clone()));
			}
			txn.execute(Statement::from_sql_and_values(
				DbBackend::Sqlite,
				format!(
					"INSERT INTO search_index_fts (rowid, document) VALUES {}",
					vec!["(?, ?)"; rows.len()].join(", ")
				),
				values,
			))
			.await?;
		}

		let removed = if remove.is_empty() {
			0
		} else {
			Self::remove_in(&txn, remove).await?
		};

		txn.commit().await?;

		Ok(removed)
	}

	async fn delete_rows(&self, ids: &[i32]) -> Result<u64, DbErr> {
		if ids.is_empty() {
			return Ok(0);
		}

		let txn = self.db.begin().await?;
		let removed = Self::remove_in(&txn, ids).await?;
		txn.commit().await?;

		Ok(removed)
	}

	async fn sweep_orphans(&self) -> Result<u64, DbErr> {
		let txn = self.db.begin().await?;

		let removed = txn
			.execute_unprepared(
				"DELETE FROM search_index \
				 WHERE item_id NOT IN (SELECT id FROM item WHERE deleted_at IS NULL)",
			)
			.await?
			.rows_affected();

		txn.execute_unprepared(
			"DELETE FROM search_index_fts WHERE rowid NOT IN (SELECT item_id FROM search_index)",
		)
		.await?;

		txn.commit().await?;

		Ok(removed)
	}
}
