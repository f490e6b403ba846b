//! Database migrations

use sea_orm_migration::prelude::*;

mod m20250301_000001_create_source_tables;
mod m20250301_000002_create_sync_queue;
mod m20250301_000003_create_search_index;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
	fn migrations() -> Vec<Box<dyn MigrationTrait>> {
		vec![
			Box::new(m20250301_000001_create_source_tables::Migration),
			Box::new(m20250301_000002_create_sync_queue::Migration),
			Box::new(m20250301_000003_create_search_index::Migration),
		]
	}
}
