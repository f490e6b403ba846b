use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sd_search_sync::{
	config::CONFIG_FILE_NAME,
	infra::db::DATABASE_FILE_NAME,
	ops::{
		backfill,
		search::{Pagination, SearchQuery},
	},
	Aggregator, Database, HealthMonitor, QueueStore, SyncConfig, SyncWorker,
};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
	Human,
	Json,
}

#[derive(Parser, Debug)]
#[command(name = "sync-worker", about = "Search index sync worker and queue administration")]
struct Cli {
	/// Directory holding the database and the default config file
	#[arg(long, default_value = ".")]
	data_dir: PathBuf,

	/// Config file, defaults to `<data-dir>/search_sync.json`
	#[arg(long)]
	config: Option<PathBuf>,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Run the processing and cleanup loops until interrupted
	Run {
		/// Stable worker id, a random UUID otherwise
		#[arg(long)]
		worker_id: Option<String>,
	},
	/// Run a single processing cycle and exit
	Once,
	/// Queue statistics
	Health,
	/// Purge dead tasks and reclaim stuck ones
	Cleanup,
	/// Release every processing task with a fresh retry budget
	EmergencyReset {
		/// Required, the reset bypasses retry accounting
		#[arg(long, default_value_t = false)]
		yes: bool,
	},
	/// Rebuild the whole index inline
	Backfill,
	/// Queue a full resync for the workers
	EnqueueFullResync,
	/// Apply database migrations
	Migrate,
	/// List queued tasks
	Tasks,
	/// Query the index
	Search {
		text: Option<String>,
		#[arg(long, default_value_t = 20)]
		limit: u64,
		#[arg(long, default_value_t = 0)]
		offset: u64,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	// Installed before the config is read so its load messages are not lost
	let log_filter = init_logging();

	let config_path = cli
		.config
		.clone()
		.unwrap_or_else(|| cli.data_dir.join(CONFIG_FILE_NAME));
	let config = SyncConfig::load_from(&config_path)
		.with_context(|| format!("failed to load config from {}", config_path.display()))?;

	apply_log_level(&log_filter, &config.log_level);

	let db = Database::open_or_create(&cli.data_dir.join(DATABASE_FILE_NAME))
		.await
		.context("failed to open database")?;
	let queue = QueueStore::new(db.conn().clone());

	match cli.command {
		Commands::Run { worker_id } => {
			let worker = match worker_id {
				Some(id) => SyncWorker::with_worker_id(db.conn().clone(), config, id),
				None => SyncWorker::new(db.conn().clone(), config),
			};

			worker.start().await;
			shutdown_signal().await;
			worker.stop().await;
		}
		Commands::Once => {
			let worker = SyncWorker::new(db.conn().clone(), config);
			let report = worker.processor().run_cycle().await?;
			print(&cli.format, &report, |r| {
				println!(
					"claimed {} / completed {} / failed {} (upserted {}, deleted {})",
					r.claimed, r.completed, r.failed, r.upserted, r.deleted
				)
			})?;
		}
		Commands::Health => {
			let report = HealthMonitor::new(queue, &config).get_health().await?;
			print(&cli.format, &report, |r| {
				println!("status:      {}", r.label);
				println!("total:       {}", r.total);
				println!("pending:     {}", r.pending);
				println!("processing:  {}", r.processing);
				println!("retrying:    {}", r.with_retries);
				println!("dead:        {}", r.dead);
				if let Some(oldest) = r.oldest_queued_at {
					println!("oldest:      {oldest}");
				}
				for (task_type, count) in &r.pending_by_type {
					println!("  {task_type}: {count}");
				}
			})?;
		}
		Commands::Cleanup => {
			let report = HealthMonitor::new(queue, &config).cleanup().await?;
			print(&cli.format, &report, |r| {
				println!(
					"purged {} dead, reclaimed {} stuck",
					r.purged_dead, r.reclaimed_stuck
				)
			})?;
		}
		Commands::EmergencyReset { yes } => {
			if !yes {
				bail!("emergency reset releases every in-flight task; pass --yes to confirm");
			}
			let reset = HealthMonitor::new(queue, &config).emergency_reset().await?;
			print(&cli.format, &serde_json::json!({ "reset": reset }), |_| {
				println!("released {reset} tasks")
			})?;
		}
		Commands::Backfill => {
			let aggregator = Aggregator::for_database(db.conn().clone(), config.upsert_chunk_size);
			let report = backfill::backfill_all(&aggregator).await?;
			print(&cli.format, &report, |r| {
				println!("upserted {}, removed {}", r.upserted, r.deleted)
			})?;
		}
		Commands::EnqueueFullResync => {
			let task = backfill::enqueue_full_resync(&queue, config.max_retries).await?;
			print(&cli.format, &task, |t| println!("queued full resync as task {}", t.id))?;
		}
		Commands::Migrate => {
			// open_or_create already migrated
			print(&cli.format, &serde_json::json!({ "migrated": true }), |_| {
				println!("database is up to date")
			})?;
		}
		Commands::Tasks => {
			let tasks = queue.list().await?;
			print(&cli.format, &tasks, |tasks| {
				for t in tasks {
					println!(
						"{:>6}  {:<24} {:<7} p{} r{}/{} {}{}",
						t.id,
						t.dedup_key(),
						t.operation.as_ref(),
						t.priority,
						t.retry_count,
						t.max_retries,
						if t.processing { "processing" } else { "pending" },
						t.last_error
							.as_deref()
							.map(|e| format!(" ({e})"))
							.unwrap_or_default(),
					);
				}
			})?;
		}
		Commands::Search {
			text,
			limit,
			offset,
		} => {
			let query = SearchQuery {
				text,
				pagination: Pagination { limit, offset },
				..Default::default()
			};
			let page = query.execute(db.conn()).await?;
			print(&cli.format, &page, |page| {
				println!("{} matching rows", page.total);
				for row in &page.rows {
					println!("{:>6}  {}", row.item_id, row.name);
				}
			})?;
		}
	}

	Ok(())
}

fn init_logging() -> reload::Handle<EnvFilter, Registry> {
	let (filter, handle) = reload::Layer::new(env_filter("info"));

	// Logs go to stderr so JSON output on stdout stays parseable
	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_writer(std::io::stderr))
		.init();

	handle
}

fn apply_log_level(handle: &reload::Handle<EnvFilter, Registry>, level: &str) {
	if let Err(e) = handle.reload(env_filter(level)) {
		warn!(error = %e, level, "Failed to apply configured log level");
	}
}

fn env_filter(default_level: &str) -> EnvFilter {
	EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(format!("{default_level},sqlx=warn")))
}

fn print<T: Serialize>(format: &OutputFormat, value: &T, human: impl FnOnce(&T)) -> Result<()> {
	match format {
		OutputFormat::Human => human(value),
		OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
	}
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			tracing::error!(error = %e, "Failed to listen for Ctrl+C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut sig) => {
				sig.recv().await;
			}
			Err(e) => {
				tracing::error!(error = %e, "Failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => info!("Received Ctrl+C, shutting down gracefully"),
		() = terminate => info!("Received SIGTERM, shutting down gracefully"),
	}
}

#[cfg(test)]
mod tests {
	use std::{
		io,
		sync::{Arc, Mutex},
	};

	use super::*;

	#[derive(Clone, Default)]
	struct Captured(Arc<Mutex<Vec<u8>>>);

	impl io::Write for Captured {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			self.0.lock().expect("lock").extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> {
			Ok(())
		}
	}

	impl Captured {
		fn text(&self) -> String {
			String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
		}
	}

	#[test]
	fn early_logs_survive_until_configured_level_applies() {
		if std::env::var_os("RUST_LOG").is_some() {
			return;
		}

		let captured = Captured::default();
		let writer = captured.clone();
		let (filter, handle) = reload::Layer::new(env_filter("info"));
		let subscriber = tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().with_writer(move || writer.clone()).with_ansi(false));

		tracing::subscriber::with_default(subscriber, || {
			info!("Loading sync config");
			apply_log_level(&handle, "error");
			info!("Filtered after reload");
		});

		let text = captured.text();
		assert!(text.contains("Loading sync config"));
		assert!(!text.contains("Filtered after reload"));
	}
}
