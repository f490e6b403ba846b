//! Sync task model
//!
//! A task is one unit of pending index work. Single-entity tasks carry an `entity_id`,
//! aggregate resync tasks carry the `target_id` of the master row whose change fans out
//! to many items, and the synthetic full resync carries neither.
//!
//! Pending tasks are deduplicated by [`dedup_key`]: a second enqueue for the same key
//! merges into the existing row instead of inserting a new one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{error::QueueError, infra::db::entities::sync_task};

pub const MIN_PRIORITY: i32 = 0;
pub const MAX_PRIORITY: i32 = 10;

pub const SINGLE_UPSERT_PRIORITY: i32 = 0;
pub const SINGLE_DELETE_PRIORITY: i32 = 1;
pub const AGGREGATE_PRIORITY: i32 = 5;
pub const FULL_RESYNC_PRIORITY: i32 = 0;

pub const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	PartialOrd,
	Ord,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	AsRefStr,
	EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskType {
	SingleEntityUpdate,
	ResyncByCategory,
	ResyncByTag,
	ResyncByOwner,
	ResyncByFile,
	ResyncBySubcomponent,
	FullResync,
}

impl TaskType {
	pub const fn master_kind(self) -> Option<MasterKind> {
		match self {
			Self::ResyncByCategory => Some(MasterKind::Category),
			Self::ResyncByTag => Some(MasterKind::Tag),
			Self::ResyncByOwner => Some(MasterKind::Owner),
			Self::ResyncByFile => Some(MasterKind::File),
			Self::ResyncBySubcomponent => Some(MasterKind::Subcomponent),
			Self::SingleEntityUpdate | Self::FullResync => None,
		}
	}
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
	Upsert,
	Delete,
}

/// Shared reference tables whose edits fan out to every item referencing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MasterKind {
	Category,
	Tag,
	Owner,
	File,
	Subcomponent,
}

impl MasterKind {
	pub const fn resync_task_type(self) -> TaskType {
		match self {
			Self::Category => TaskType::ResyncByCategory,
			Self::Tag => TaskType::ResyncByTag,
			Self::Owner => TaskType::ResyncByOwner,
			Self::File => TaskType::ResyncByFile,
			Self::Subcomponent => TaskType::ResyncBySubcomponent,
		}
	}
}

/// Uniqueness scope for pending tasks.
pub fn dedup_key(task_type: TaskType, entity_id: Option<i32>, target_id: Option<i32>) -> String {
	match (entity_id, target_id) {
		(Some(id), _) | (None, Some(id)) => format!("{task_type}:{id}"),
		(None, None) => task_type.to_string(),
	}
}

pub fn clamp_priority(priority: i32) -> i32 {
	priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Enqueue request, either inserted as a new row or merged into a pending one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
	pub task_type: TaskType,
	pub entity_id: Option<i32>,
	pub target_id: Option<i32>,
	pub operation: Operation,
	pub priority: i32,
	pub estimated_affected_count: Option<i64>,
	pub max_retries: i32,
	pub metadata: Option<serde_json::Value>,
}

impl NewTask {
	pub fn single(entity_id: i32, operation: Operation) -> Self {
		Self {
			task_type: TaskType::SingleEntityUpdate,
			entity_id: Some(entity_id),
			target_id: None,
			operation,
			priority: match operation {
				Operation::Upsert => SINGLE_UPSERT_PRIORITY,
				Operation::Delete => SINGLE_DELETE_PRIORITY,
			},
			estimated_affected_count: None,
			max_retries: DEFAULT_MAX_RETRIES,
			metadata: None,
		}
	}

	pub fn aggregate(kind: MasterKind, target_id: i32, estimated_affected_count: i64) -> Self {
		Self {
			task_type: kind.resync_task_type(),
			entity_id: None,
			target_id: Some(target_id),
			operation: Operation::Upsert,
			priority: AGGREGATE_PRIORITY,
			estimated_affected_count: Some(estimated_affected_count),
			max_retries: DEFAULT_MAX_RETRIES,
			metadata: None,
		}
	}

	pub fn full_resync() -> Self {
		Self {
			task_type: TaskType::FullResync,
			entity_id: None,
			target_id: None,
			operation: Operation::Upsert,
			priority: FULL_RESYNC_PRIORITY,
			estimated_affected_count: None,
			max_retries: DEFAULT_MAX_RETRIES,
			metadata: None,
		}
	}

	#[must_use]
	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = clamp_priority(priority);
		self
	}

	#[must_use]
	pub fn with_max_retries(mut self, max_retries: i32) -> Self {
		self.max_retries = max_retries.max(1);
		self
	}

	#[must_use]
	pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
		self.metadata = Some(metadata);
		self
	}

	pub fn dedup_key(&self) -> String {
		dedup_key(self.task_type, self.entity_id, self.target_id)
	}

	/// Checks the key shape the `sync_task` CHECK constraint enforces, so bad requests
	/// fail before reaching the database.
	pub fn validate(&self) -> Result<(), String> {
		let shape_ok = match self.task_type {
			TaskType::SingleEntityUpdate => self.entity_id.is_some() && self.target_id.is_none(),
			TaskType::FullResync => self.entity_id.is_none() && self.target_id.is_none(),
			_ => self.entity_id.is_none() && self.target_id.is_some(),
		};
		if !shape_ok {
			return Err(format!(
				"{} requires {}",
				self.task_type,
				match self.task_type {
					TaskType::SingleEntityUpdate => "entity_id only",
					TaskType::FullResync => "neither entity_id nor target_id",
					_ => "target_id only",
				}
			));
		}
		if self.task_type != TaskType::SingleEntityUpdate && self.operation == Operation::Delete {
			return Err(format!("{} cannot carry a delete operation", self.task_type));
		}
		if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
			return Err(format!("priority {} out of range", self.priority));
		}
		if self.max_retries < 1 {
			return Err("max_retries must be at least 1".to_string());
		}

		Ok(())
	}
}

/// A persisted queue row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
	pub id: i32,
	pub task_type: TaskType,
	pub entity_id: Option<i32>,
	pub target_id: Option<i32>,
	pub operation: Operation,
	pub priority: i32,
	pub estimated_affected_count: Option<i64>,
	pub queued_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub processing: bool,
	pub worker_id: Option<String>,
	pub retry_count: i32,
	pub max_retries: i32,
	pub last_error: Option<String>,
	pub error_details: Option<serde_json::Value>,
	pub metadata: Option<serde_json::Value>,
}

impl Task {
	/// Exhausted its retry budget; never claimed again until re-enqueued or reset.
	pub fn is_dead(&self) -> bool {
		self.retry_count >= self.max_retries
	}

	pub fn dedup_key(&self) -> String {
		dedup_key(self.task_type, self.entity_id, self.target_id)
	}
}

impl TryFrom<sync_task::Model> for Task {
	type Error = QueueError;

	fn try_from(model: sync_task::Model) -> Result<Self, Self::Error> {
		let task_type = model
			.task_type
			.parse::<TaskType>()
			.map_err(|_| QueueError::InvalidTask {
				id: model.id,
				reason: format!("unknown task type '{}'", model.task_type),
			})?;
		let operation = model
			.operation
			.parse::<Operation>()
			.map_err(|_| QueueError::InvalidTask {
				id: model.id,
				reason: format!("unknown operation '{}'", model.operation),
			})?;

		Ok(Self {
			id: model.id,
			task_type,
			entity_id: model.entity_id,
			target_id: model.target_id,
			operation,
			priority: model.priority,
			estimated_affected_count: model.estimated_affected_count,
			queued_at: model.queued_at,
			started_at: model.started_at,
			completed_at: model.completed_at,
			processing: model.processing,
			worker_id: model.worker_id,
			retry_count: model.retry_count,
			max_retries: model.max_retries,
			last_error: model.last_error,
			error_details: model.error_details,
			metadata: model.metadata,
		})
	}
}
