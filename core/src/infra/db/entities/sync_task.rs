//! Sync task entity
//!
//! Durable queue of pending index work. Created by the change emitter, claimed by
//! workers, deleted on success. At most one row per `dedup_key` may be pending
//! (`processing = false`); the partial unique index enforcing that lives in the
//! migration.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_task")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	/// `<task_type>:<id>`, or the bare task type for the full resync
	pub dedup_key: String,
	pub task_type: String, // TaskType as string
	pub entity_id: Option<i32>,
	pub target_id: Option<i32>,
	pub operation: String, // Operation as string

	pub priority: i32,
	pub estimated_affected_count: Option<i64>,

	pub queued_at: DateTimeUtc,
	pub started_at: Option<DateTimeUtc>,
	pub completed_at: Option<DateTimeUtc>,

	pub processing: bool,
	pub worker_id: Option<String>,

	pub retry_count: i32,
	pub max_retries: i32,
	#[sea_orm(column_type = "Text", nullable)]
	pub last_error: Option<String>,
	pub error_details: Option<Json>,
	pub metadata: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
