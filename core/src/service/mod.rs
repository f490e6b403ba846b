//! Search sync services
//!
//! - `queue`: durable task store, enqueue/merge and claims
//! - `emitter`: mutation hooks feeding the queue
//! - `aggregator`: resolution and index row rebuilds
//! - `processor`: one claim-resolve-write cycle
//! - `health`: statistics, cleanup and emergency reset
//! - `worker`: background loops driving the processor and cleanup

pub mod aggregator;
pub mod emitter;
pub mod health;
pub mod processor;
pub mod queue;
pub mod worker;
