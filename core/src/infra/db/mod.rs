//! Database infrastructure using SeaORM

use sea_orm::{
	sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
	ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection,
	DatabaseTransaction, DbErr, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod entities;
pub mod migration;

/// File name of the SQLite database inside a data directory
pub const DATABASE_FILE_NAME: &str = "search_sync.db";

/// Database wrapper for the search sync pipeline
#[derive(Clone)]
pub struct Database {
	/// SeaORM database connection
	conn: DatabaseConnection,
}

impl Database {
	/// Create a new database at the specified path
	pub async fn create(path: &Path) -> Result<Self, DbErr> {
		// Ensure parent directory exists
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| DbErr::Custom(format!("Failed to create directory: {}", e)))?;
		}

		let conn = SeaDatabase::connect(connect_options(format!(
			"sqlite://{}?mode=rwc",
			path.display()
		)))
		.await?;

		info!("Created database at {:?}", path);

		Ok(Self { conn })
	}

	/// Open an existing database
	pub async fn open(path: &Path) -> Result<Self, DbErr> {
		if !path.exists() {
			return Err(DbErr::Custom(format!(
				"Database does not exist: {}",
				path.display()
			)));
		}

		let conn =
			SeaDatabase::connect(connect_options(format!("sqlite://{}", path.display()))).await?;

		info!("Opened database at {:?}", path);

		Ok(Self { conn })
	}

	/// Create if missing, then bring the schema up to date
	pub async fn open_or_create(path: &Path) -> Result<Self, DbErr> {
		let db = if path.exists() {
			Self::open(path).await?
		} else {
			Self::create(path).await?
		};
		db.migrate().await?;
		Ok(db)
	}

	/// Run migrations
	pub async fn migrate(&self) -> Result<(), DbErr> {
		migration::Migrator::up(&self.conn, None).await?;
		info!("Database migrations completed successfully");
		Ok(())
	}

	/// Get the database connection
	pub fn conn(&self) -> &DatabaseConnection {
		&self.conn
	}
}

/// Begin a transaction that holds the write lock from its first statement.
///
/// A deferred SQLite transaction that reads before it writes cannot upgrade its lock
/// while another writer is active and fails with `SQLITE_BUSY` without waiting. Taking
/// the lock up front makes concurrent writers queue on the busy timeout instead.
pub async fn begin_write(db: &DatabaseConnection) -> Result<DatabaseTransaction, DbErr> {
	let txn = db.begin().await?;
	txn.execute_unprepared("UPDATE sync_task SET id = id WHERE 0")
		.await?;
	Ok(txn)
}

// Concurrent claimers and emitters share the file, so WAL and a busy timeout are set
// explicitly rather than left to the driver defaults.
fn connect_options(url: String) -> ConnectOptions {
	let mut opt = ConnectOptions::new(url);
	opt.max_connections(10)
		.min_connections(1)
		.connect_timeout(Duration::from_secs(8))
		.acquire_timeout(Duration::from_secs(30))
		.idle_timeout(Duration::from_secs(300))
		.sqlx_logging(false) // We'll use tracing instead
		.map_sqlx_sqlite_opts(sqlite_options);
	opt
}

fn sqlite_options(opts: SqliteConnectOptions) -> SqliteConnectOptions {
	opts.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(Duration::from_secs(30))
		.foreign_keys(true)
}
