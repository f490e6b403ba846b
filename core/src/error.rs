use sea_orm::DbErr;
use thiserror::Error;

use crate::domain::task::TaskType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("database error: {0}")]
	Database(#[from] DbErr),
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("invalid configuration: {0}")]
	Config(String),
	#[error("invalid search query: {0}")]
	InvalidQuery(String),
	#[error("{entity} <id='{id}'> not found")]
	NotFound { entity: &'static str, id: i32 },

	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error(transparent)]
	Write(#[from] WriteError),
}

/// Failures of the durable queue itself: enqueue, claim, completion and requeue.
#[derive(Debug, Error)]
pub enum QueueError {
	#[error("queue database error: {0}")]
	Database(#[from] DbErr),
	#[error("invalid task <id='{id}'>: {reason}")]
	InvalidTask { id: i32, reason: String },
	#[error("rejected enqueue request: {0}")]
	Rejected(String),
	#[error("enqueue returned no row for dedup key <key='{0}'>")]
	EnqueueLost(String),
}

/// Failures turning a claimed task into a set of affected item IDs.
///
/// These are isolated per task: the task is requeued with the error recorded while the
/// rest of the batch carries on.
#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("failed to resolve <task_id='{task_id}', task_type='{task_type}'>: {source}")]
	Database {
		task_id: i32,
		task_type: TaskType,
		#[source]
		source: DbErr,
	},
	#[error("task <id='{task_id}', task_type='{task_type}'> is missing its {field}")]
	MissingKey {
		task_id: i32,
		task_type: TaskType,
		field: &'static str,
	},
}

/// Failures of the pooled write step. Any of these fails the whole batch.
#[derive(Debug, Error)]
pub enum WriteError {
	#[error("failed to load source rows: {0}")]
	Read(#[source] DbErr),
	#[error("failed to write index chunk of {chunk_len} rows: {source}")]
	Chunk {
		chunk_len: usize,
		#[source]
		source: DbErr,
	},
	#[error("failed to delete {count} index rows: {source}")]
	Delete {
		count: usize,
		#[source]
		source: DbErr,
	},
	#[error("failed to sweep orphaned index rows: {0}")]
	Sweep(#[source] DbErr),
}

impl ResolveError {
	/// Short diagnostic stored on the task row as `last_error`.
	pub fn summary(&self) -> String {
		match self {
			Self::Database { source, .. } => format!("resolution failed: {source}"),
			Self::MissingKey { field, .. } => format!("malformed task: missing {field}"),
		}
	}
}
