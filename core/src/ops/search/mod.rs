//! Read path over the search index
//!
//! Free text goes through the `search_index_fts` FTS5 table, everything else filters
//! the `search_index` projection directly.

pub mod query;
pub mod sorting;

pub use query::{Pagination, SearchFilters, SearchPage, SearchQuery, ValueRange};
pub use sorting::{SortBuilder, SortDirection, SortField, SortOptions};
