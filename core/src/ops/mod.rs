//! Operations exposed to the surrounding application
//!
//! - `backfill`: full resync and bulk rebuild entry points
//! - `catalog`: catalog writes that emit their sync task in the same transaction
//! - `search`: the query surface over the index

pub mod backfill;
pub mod catalog;
pub mod search;
