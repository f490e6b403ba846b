//! Queue, aggregator and worker tuning knobs

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "search_sync.json";

/// Upper bound for the stuck and dead-task windows (30 days)
pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// Main sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Maximum number of tasks claimed per processing cycle
	pub batch_size: usize,

	/// Items upserted per index transaction
	pub upsert_chunk_size: usize,

	/// Retry budget stamped on newly enqueued tasks
	pub max_retries: i32,

	/// A task processing for longer than this is considered abandoned
	pub stuck_after_secs: u64,

	/// Dead tasks older than this are purged by cleanup
	pub dead_task_ttl_secs: u64,

	/// Delay between processing cycles when the queue is idle
	pub poll_interval_ms: u64,

	/// Delay between cleanup runs
	pub cleanup_interval_secs: u64,

	/// How many times a claim is retried after losing rows to other workers
	pub claim_rounds: usize,

	/// Change emission settings
	pub emitter: EmitterConfig,

	/// Logging level used when `RUST_LOG` is not set
	pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
	/// When false every change hook is a no-op (bulk imports, replication catch-up)
	pub enabled: bool,
}

impl Default for EmitterConfig {
	fn default() -> Self {
		Self { enabled: true }
	}
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			batch_size: 50,
			upsert_chunk_size: 200,
			max_retries: 3,
			stuck_after_secs: 10 * 60,
			dead_task_ttl_secs: 60 * 60,
			poll_interval_ms: 1_000,
			cleanup_interval_secs: 60,
			claim_rounds: 3,
			emitter: EmitterConfig::default(),
			log_level: "info".to_string(),
		}
	}
}

impl SyncConfig {
	/// Load configuration from `path`, writing the defaults there if the file is missing
	pub fn load_from(path: &Path) -> Result<Self> {
		if path.exists() {
			info!("Loading sync config from {:?}", path);
			let json = fs::read_to_string(path)?;
			let config: Self = serde_json::from_str(&json)?;
			config.validate()?;
			Ok(config)
		} else {
			warn!("No sync config found, creating default at {:?}", path);
			let config = Self::default();
			config.save(path)?;
			Ok(config)
		}
	}

	/// Save configuration to disk
	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}

		fs::write(path, serde_json::to_string_pretty(self)?)?;
		info!("Saved sync config to {:?}", path);
		Ok(())
	}

	pub fn validate(&self) -> Result<()> {
		if self.batch_size == 0 {
			return Err(Error::Config("batch_size must be greater than zero".into()));
		}
		if self.upsert_chunk_size == 0 {
			return Err(Error::Config(
				"upsert_chunk_size must be greater than zero".into(),
			));
		}
		if self.claim_rounds == 0 {
			return Err(Error::Config("claim_rounds must be greater than zero".into()));
		}
		if self.max_retries < 1 {
			return Err(Error::Config("max_retries must be at least 1".into()));
		}
		if self.stuck_after_secs == 0 || self.dead_task_ttl_secs == 0 {
			return Err(Error::Config("cleanup windows must be non-zero".into()));
		}
		if self.stuck_after_secs > MAX_WINDOW_SECS || self.dead_task_ttl_secs > MAX_WINDOW_SECS {
			return Err(Error::Config(format!(
				"cleanup windows must not exceed {MAX_WINDOW_SECS} seconds"
			)));
		}
		if self.dead_task_ttl_secs < self.stuck_after_secs {
			return Err(Error::Config(format!(
				"dead_task_ttl_secs ({}) must not be shorter than stuck_after_secs ({})",
				self.dead_task_ttl_secs, self.stuck_after_secs
			)));
		}

		Ok(())
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn cleanup_interval(&self) -> Duration {
		Duration::from_secs(self.cleanup_interval_secs)
	}

	pub fn stuck_after(&self) -> Duration {
		Duration::from_secs(self.stuck_after_secs)
	}

	pub fn dead_task_ttl(&self) -> Duration {
		Duration::from_secs(self.dead_task_ttl_secs)
	}
}
