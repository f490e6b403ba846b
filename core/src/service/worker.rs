//! Background sync worker
//!
//! Runs two loops on the tokio runtime:
//! - processing: `run_cycle` every poll interval, immediately again while batches come
//!   back full
//! - cleanup: `HealthMonitor::cleanup` every cleanup interval
//!
//! Cycle failures are logged and retried on the next tick. Several workers (in one
//! process or many) can share a database; claims never overlap.

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use sea_orm::DatabaseConnection;
use tokio::{
	sync::{broadcast, Mutex},
	task::JoinHandle,
};
use tracing::{error, info};
use uuid::Uuid;

use super::{
	aggregator::Aggregator, health::HealthMonitor, processor::SyncProcessor, queue::QueueStore,
};
use crate::config::SyncConfig;

pub struct SyncWorker {
	config: SyncConfig,
	processor: Arc<SyncProcessor>,
	health: Arc<HealthMonitor>,
	is_running: Arc<AtomicBool>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncWorker {
	/// Worker with a fresh UUID worker id.
	pub fn new(db: DatabaseConnection, config: SyncConfig) -> Self {
		Self::with_worker_id(db, config, Uuid::new_v4().to_string())
	}

	pub fn with_worker_id(db: DatabaseConnection, config: SyncConfig, worker_id: String) -> Self {
		let queue = QueueStore::new(db.clone());
		let aggregator = Aggregator::for_database(db, config.upsert_chunk_size);
		let (shutdown_tx, _) = broadcast::channel(1);

		Self {
			processor: Arc::new(SyncProcessor::new(
				queue.clone(),
				aggregator,
				worker_id,
				&config,
			)),
			health: Arc::new(HealthMonitor::new(queue, &config)),
			config,
			is_running: Arc::new(AtomicBool::new(false)),
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn worker_id(&self) -> &str {
		self.processor.worker_id()
	}

	pub fn processor(&self) -> &Arc<SyncProcessor> {
		&self.processor
	}

	pub fn health(&self) -> &Arc<HealthMonitor> {
		&self.health
	}

	pub fn is_running(&self) -> bool {
		self.is_running.load(Ordering::SeqCst)
	}

	/// Spawn both loops. Calling it again while running does nothing.
	pub async fn start(&self) {
		if self.is_running.swap(true, Ordering::SeqCst) {
			return;
		}

		info!(
			worker_id = %self.worker_id(),
			batch_size = self.config.batch_size,
			poll_interval_ms = self.config.poll_interval_ms,
			"Starting search sync worker"
		);

		let mut handles = self.handles.lock().await;
		handles.push(tokio::spawn(Self::run_processing_loop(
			self.processor.clone(),
			self.config.poll_interval(),
			self.shutdown_tx.subscribe(),
		)));
		handles.push(tokio::spawn(Self::run_cleanup_loop(
			self.health.clone(),
			self.config.cleanup_interval(),
			self.shutdown_tx.subscribe(),
		)));
	}

	/// Signal both loops and wait for them to finish their current step.
	pub async fn stop(&self) {
		if !self.is_running.swap(false, Ordering::SeqCst) {
			return;
		}

		info!(worker_id = %self.worker_id(), "Stopping search sync worker");
		let _ = self.shutdown_tx.send(());

		let handles = std::mem::take(&mut *self.handles.lock().await);
		for handle in handles {
			if let Err(e) = handle.await {
				error!(error = %e, "Sync worker loop panicked");
			}
		}
	}

	async fn run_processing_loop(
		processor: Arc<SyncProcessor>,
		poll_interval: std::time::Duration,
		mut shutdown_rx: broadcast::Receiver<()>,
	) {
		loop {
			let saturated = match processor.run_cycle().await {
				Ok(report) => report.claimed >= processor.batch_size(),
				Err(e) => {
					error!(worker_id = %processor.worker_id(), error = %e, "Sync cycle failed");
					false
				}
			};

			// A full batch means more work is likely waiting
			let delay = if saturated {
				std::time::Duration::ZERO
			} else {
				poll_interval
			};

			tokio::select! {
				_ = shutdown_rx.recv() => break,
				_ = tokio::time::sleep(delay) => {}
			}
		}

		info!(worker_id = %processor.worker_id(), "Sync processing loop stopped");
	}

	async fn run_cleanup_loop(
		health: Arc<HealthMonitor>,
		cleanup_interval: std::time::Duration,
		mut shutdown_rx: broadcast::Receiver<()>,
	) {
		let mut interval = tokio::time::interval(cleanup_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = shutdown_rx.recv() => break,
				_ = interval.tick() => {
					match health.cleanup().await {
						Ok(report) if report.purged_dead > 0 || report.reclaimed_stuck > 0 => {
							info!(
								purged_dead = report.purged_dead,
								reclaimed_stuck = report.reclaimed_stuck,
								"Sync queue cleanup finished"
							);
						}
						Ok(_) => {}
						Err(e) => error!(error = %e, "Sync queue cleanup failed"),
					}
				}
			}
		}

		info!("Sync cleanup loop stopped");
	}
}
