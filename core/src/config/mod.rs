//! Sync worker configuration

pub mod sync_config;

pub use sync_config::{EmitterConfig, SyncConfig, CONFIG_FILE_NAME};
