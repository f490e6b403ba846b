//! Create the catalog tables the search index is projected from
//!
//! - item: the synchronized entity
//! - owner, file, category, tag, subcomponent: shared master rows
//! - item_category, item_tag, item_subcomponent: many-to-many links

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Owner::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Owner::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Owner::DisplayName).string().not_null())
					.col(ColumnDef::new(Owner::Email).string())
					.col(ColumnDef::new(Owner::AvatarUrl).string())
					.col(
						ColumnDef::new(Owner::IsActive)
							.boolean()
							.not_null()
							.default(true),
					)
					.col(ColumnDef::new(Owner::DeletedAt).timestamp_with_time_zone())
					.col(
						ColumnDef::new(Owner::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(Owner::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(File::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(File::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(File::Url).string())
					.col(ColumnDef::new(File::CdnUrl).string())
					.col(ColumnDef::new(File::MimeType).string())
					.col(
						ColumnDef::new(File::IsActive)
							.boolean()
							.not_null()
							.default(true),
					)
					.col(ColumnDef::new(File::DeletedAt).timestamp_with_time_zone())
					.col(
						ColumnDef::new(File::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(File::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		for master in [Master::Category, Master::Tag, Master::Subcomponent] {
			manager
				.create_table(
					Table::create()
						.table(master)
						.if_not_exists()
						.col(
							ColumnDef::new(Master::Id)
								.integer()
								.not_null()
								.auto_increment()
								.primary_key(),
						)
						.col(ColumnDef::new(Master::Name).string().not_null())
						.col(ColumnDef::new(Master::Slug).string())
						.col(
							ColumnDef::new(Master::IsActive)
								.boolean()
								.not_null()
								.default(true),
						)
						.col(ColumnDef::new(Master::DeletedAt).timestamp_with_time_zone())
						.col(
							ColumnDef::new(Master::CreatedAt)
								.timestamp_with_time_zone()
								.not_null(),
						)
						.col(
							ColumnDef::new(Master::UpdatedAt)
								.timestamp_with_time_zone()
								.not_null(),
						)
						.to_owned(),
				)
				.await?;
		}

		manager
			.create_table(
				Table::create()
					.table(Item::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Item::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Item::Name).string().not_null())
					.col(ColumnDef::new(Item::Description).text())
					.col(ColumnDef::new(Item::PreviewText).text())
					.col(ColumnDef::new(Item::Contributors).json())
					.col(ColumnDef::new(Item::OwnerId).integer())
					.col(ColumnDef::new(Item::PrimaryFileId).integer())
					.col(
						ColumnDef::new(Item::IsActive)
							.boolean()
							.not_null()
							.default(true),
					)
					.col(ColumnDef::new(Item::DeletedAt).timestamp_with_time_zone())
					.col(
						ColumnDef::new(Item::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(
						ColumnDef::new(Item::UpdatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.foreign_key(
						ForeignKey::create()
							.name("fk_item_owner")
							.from(Item::Table, Item::OwnerId)
							.to(Owner::Table, Owner::Id)
							.on_delete(ForeignKeyAction::SetNull),
					)
					.foreign_key(
						ForeignKey::create()
							.name("fk_item_primary_file")
							.from(Item::Table, Item::PrimaryFileId)
							.to(File::Table, File::Id)
							.on_delete(ForeignKeyAction::SetNull),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_item_owner_id")
					.table(Item::Table)
					.col(Item::OwnerId)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_item_primary_file_id")
					.table(Item::Table)
					.col(Item::PrimaryFileId)
					.to_owned(),
			)
			.await?;

		for (link, master, master_id, reverse_index) in [
			(
				Link::ItemCategory,
				Master::Category,
				Link::CategoryId,
				"idx_item_category_category_id",
			),
			(Link::ItemTag, Master::Tag, Link::TagId, "idx_item_tag_tag_id"),
			(
				Link::ItemSubcomponent,
				Master::Subcomponent,
				Link::SubcomponentId,
				"idx_item_subcomponent_subcomponent_id",
			),
		] {
			manager
				.create_table(
					Table::create()
						.table(link)
						.if_not_exists()
						.col(ColumnDef::new(Link::ItemId).integer().not_null())
						.col(ColumnDef::new(master_id).integer().not_null())
						.col(
							ColumnDef::new(Link::CreatedAt)
								.timestamp_with_time_zone()
								.not_null(),
						)
						.primary_key(Index::create().col(Link::ItemId).col(master_id))
						.foreign_key(
							ForeignKey::create()
								.from(link, Link::ItemId)
								.to(Item::Table, Item::Id)
								.on_delete(ForeignKeyAction::Cascade),
						)
						.foreign_key(
							ForeignKey::create()
								.from(link, master_id)
								.to(master, Master::Id)
								.on_delete(ForeignKeyAction::Cascade),
						)
						.to_owned(),
				)
				.await?;

			// Reverse lookup used by aggregate resolution
			manager
				.create_index(
					Index::create()
						.name(reverse_index)
						.table(link)
						.col(master_id)
						.to_owned(),
				)
				.await?;
		}

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		for link in [Link::ItemSubcomponent, Link::ItemTag, Link::ItemCategory] {
			manager
				.drop_table(Table::drop().table(link).to_owned())
				.await?;
		}

		manager
			.drop_table(Table::drop().table(Item::Table).to_owned())
			.await?;

		for master in [Master::Subcomponent, Master::Tag, Master::Category] {
			manager
				.drop_table(Table::drop().table(master).to_owned())
				.await?;
		}

		manager
			.drop_table(Table::drop().table(File::Table).to_owned())
			.await?;

		manager
			.drop_table(Table::drop().table(Owner::Table).to_owned())
			.await?;

		Ok(())
	}
}

#[derive(DeriveIden)]
enum Item {
	Table,
	Id,
	Name,
	Description,
	PreviewText,
	Contributors,
	OwnerId,
	PrimaryFileId,
	IsActive,
	DeletedAt,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum Owner {
	Table,
	Id,
	DisplayName,
	Email,
	AvatarUrl,
	IsActive,
	DeletedAt,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden)]
enum File {
	Table,
	Id,
	Url,
	CdnUrl,
	MimeType,
	IsActive,
	DeletedAt,
	CreatedAt,
	UpdatedAt,
}

/// Category, tag and subcomponent share one shape
#[derive(DeriveIden, Clone, Copy)]
enum Master {
	Category,
	Tag,
	Subcomponent,
	Id,
	Name,
	Slug,
	IsActive,
	DeletedAt,
	CreatedAt,
	UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum Link {
	ItemCategory,
	ItemTag,
	ItemSubcomponent,
	ItemId,
	CategoryId,
	TagId,
	SubcomponentId,
	CreatedAt,
}
