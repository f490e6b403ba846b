//! Create the denormalized search index
//!
//! `search_index` holds one projection row per item. `search_index_fts` is an FTS5
//! table over the combined search document, keyed by `rowid = item_id` and maintained
//! by the aggregator in the same transaction as the row itself.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(SearchIndex::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(SearchIndex::ItemId)
							.integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(SearchIndex::Name).string().not_null())
					.col(ColumnDef::new(SearchIndex::Description).text())
					.col(ColumnDef::new(SearchIndex::PreviewText).text())
					.col(ColumnDef::new(SearchIndex::IsActive).boolean().not_null())
					.col(ColumnDef::new(SearchIndex::OwnerId).integer())
					.col(ColumnDef::new(SearchIndex::PrimaryFileId).integer())
					.col(ColumnDef::new(SearchIndex::Owner).json())
					.col(ColumnDef::new(SearchIndex::PrimaryFile).json())
					.col(ColumnDef::new(SearchIndex::Contributors).json().not_null())
					.col(ColumnDef::new(SearchIndex::Categories).json().not_null())
					.col(ColumnDef::new(SearchIndex::Tags).json().not_null())
					.col(ColumnDef::new(SearchIndex::Subcomponents).json().not_null())
					.col(ColumnDef::new(SearchIndex::CategoryIds).json().not_null())
					.col(ColumnDef::new(SearchIndex::TagIds).json().not_null())
					.col(ColumnDef::new(SearchIndex::SubcomponentIds).json().not_null())
					.col(
						ColumnDef::new(SearchIndex::SubcomponentCount)
							.integer()
							.not_null()
							.default(0),
					)
					.col(ColumnDef::new(SearchIndex::SearchDocument).text().not_null())
					.col(
						ColumnDef::new(SearchIndex::ItemCreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(SearchIndex::ItemUpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(SearchIndex::LastUpdated)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		for (name, column) in [
			("idx_search_index_owner_id", SearchIndex::OwnerId),
			("idx_search_index_primary_file_id", SearchIndex::PrimaryFileId),
			("idx_search_index_last_updated", SearchIndex::LastUpdated),
			("idx_search_index_name", SearchIndex::Name),
		] {
			manager
				.create_index(
					Index::create()
						.name(name)
						.table(SearchIndex::Table)
						.col(column)
						.to_owned(),
				)
				.await?;
		}

		manager
			.get_connection()
			.execute_unprepared(
				"CREATE VIRTUAL TABLE IF NOT EXISTS search_index_fts USING fts5(\
				 document, tokenize = 'unicode61 remove_diacritics 2')",
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.get_connection()
			.execute_unprepared("DROP TABLE IF EXISTS search_index_fts")
			.await?;

		manager
			.drop_table(Table::drop().table(SearchIndex::Table).to_owned())
			.await?;

		Ok(())
	}
}

#[derive(DeriveIden, Clone, Copy)]
enum SearchIndex {
	Table,
	ItemId,
	Name,
	Description,
	PreviewText,
	IsActive,
	OwnerId,
	PrimaryFileId,
	Owner,
	PrimaryFile,
	Contributors,
	Categories,
	Tags,
	Subcomponents,
	CategoryIds,
	TagIds,
	SubcomponentIds,
	SubcomponentCount,
	SearchDocument,
	ItemCreatedAt,
	ItemUpdatedAt,
	LastUpdated,
}
