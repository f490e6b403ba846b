//! Domain models for the search sync pipeline
//!
//! - `task`: queue units and their dedup/priority rules
//! - `source`: read-only snapshots of the catalog tables an index row is built from
//! - `index`: the denormalized, searchable projection row

pub mod index;
pub mod source;
pub mod task;

pub use index::{FileSummary, IndexRow, LinkedSummary, OwnerSummary};
pub use source::{Contributor, SourceFile, SourceItem, SourceSnapshot};
pub use task::{MasterKind, NewTask, Operation, Task, TaskType};
