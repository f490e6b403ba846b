//! Index search query implementation

use chrono::{DateTime, Utc};
use sea_orm::{
	sea_query::Expr, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
	QueryFilter, QuerySelect,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sorting::{SortBuilder, SortOptions};
use crate::{
	domain::IndexRow,
	error::{Error, Result},
	infra::db::entities::search_index,
};

pub const DEFAULT_LIMIT: u64 = 50;
pub const MAX_LIMIT: u64 = 1_000;

/// Inclusive range; either bound may be left open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange<T> {
	pub min: Option<T>,
	pub max: Option<T>,
}

impl<T: PartialOrd> ValueRange<T> {
	pub fn between(min: T, max: T) -> Self {
		Self {
			min: Some(min),
			max: Some(max),
		}
	}

	pub fn at_least(min: T) -> Self {
		Self {
			min: Some(min),
			max: None,
		}
	}

	pub fn at_most(max: T) -> Self {
		Self {
			min: None,
			max: Some(max),
		}
	}

	fn is_valid(&self) -> bool {
		match (&self.min, &self.max) {
			(Some(min), Some(max)) => min <= max,
			_ => true,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
	pub owner_id: Option<i32>,
	pub is_active: Option<bool>,
	pub primary_file_id: Option<i32>,
	/// Rows must link every listed category
	pub category_ids: Vec<i32>,
	pub tag_ids: Vec<i32>,
	pub subcomponent_ids: Vec<i32>,
	pub subcomponent_count: Option<ValueRange<i32>>,
	pub last_updated: Option<ValueRange<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
	pub limit: u64,
	pub offset: u64,
}

impl Default for Pagination {
	fn default() -> Self {
		Self {
			limit: DEFAULT_LIMIT,
			offset: 0,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
	pub text: Option<String>,
	pub filters: SearchFilters,
	pub sort: SortOptions,
	pub pagination: Pagination,
}

/// One page of matching rows plus the number of rows matching overall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
	pub rows: Vec<IndexRow>,
	pub total: u64,
}

impl SearchQuery {
	pub fn text(text: impl Into<String>) -> Self {
		Self {
			text: Some(text.into()),
			..Default::default()
		}
	}

	pub fn with_filters(mut self, filters: SearchFilters) -> Self {
		self.filters = filters;
		self
	}

	pub fn with_sort(mut self, sort: SortOptions) -> Self {
		self.sort = sort;
		self
	}

	pub fn with_page(mut self, limit: u64, offset: u64) -> Self {
		self.pagination = Pagination { limit, offset };
		self
	}

	pub fn validate(&self) -> Result<()> {
		if self.pagination.limit == 0 || self.pagination.limit > MAX_LIMIT {
			return Err(Error::InvalidQuery(format!(
				"limit must be between 1 and {MAX_LIMIT}, got {}",
				self.pagination.limit
			)));
		}

		if let Some(range) = &self.filters.subcomponent_count {
			if !range.is_valid() {
				return Err(Error::InvalidQuery(
					"subcomponent_count range has min > max".to_string(),
				));
			}
		}

		if let Some(range) = &self.filters.last_updated {
			if !range.is_valid() {
				return Err(Error::InvalidQuery(
					"last_updated range has min > max".to_string(),
				));
			}
		}

		Ok(())
	}

	pub async fn execute<C: ConnectionTrait>(&self, conn: &C) -> Result<SearchPage> {
		self.validate()?;

		let fts_match = self.text.as_deref().and_then(fts_match_expression);
		let select = search_index::Entity::find().filter(self.condition(fts_match.as_deref()));

		let total = select.clone().count(conn).await?;

		let rows = SortBuilder::new()
			.apply_sort(&self.sort, fts_match.as_deref())
			.tie_break_by_id()
			.apply(select)
			.limit(self.pagination.limit)
			.offset(self.pagination.offset)
			.all(conn)
			.await?
			.into_iter()
			.map(IndexRow::try_from)
			.collect::<std::result::Result<Vec<_>, _>>()?;

		debug!(
			text = ?self.text,
			total,
			returned = rows.len(),
			"Executed index search"
		);

		Ok(SearchPage { rows, total })
	}

	fn condition(&self, fts_match: Option<&str>) -> Condition {
		let filters = &self.filters;
		let mut condition = Condition::all();

		if let Some(fts_match) = fts_match {
			condition = condition.add(Expr::cust_with_values(
				"search_index.item_id IN \
				 (SELECT rowid FROM search_index_fts WHERE search_index_fts MATCH ?)",
				[fts_match.to_owned()],
			));
		}

		if let Some(owner_id) = filters.owner_id {
			condition = condition.add(search_index::Column::OwnerId.eq(owner_id));
		}
		if let Some(is_active) = filters.is_active {
			condition = condition.add(search_index::Column::IsActive.eq(is_active));
		}
		if let Some(primary_file_id) = filters.primary_file_id {
			condition = condition.add(search_index::Column::PrimaryFileId.eq(primary_file_id));
		}

		for (column, ids) in [
			("category_ids", &filters.category_ids),
			("tag_ids", &filters.tag_ids),
			("subcomponent_ids", &filters.subcomponent_ids),
		] {
			for id in ids {
				condition = condition.add(Expr::cust_with_values(
					format!(
						"EXISTS (SELECT 1 FROM json_each(search_index.{column}) \
						 WHERE json_each.value = ?)"
					),
					[*id],
				));
			}
		}

		if let Some(range) = &filters.subcomponent_count {
			if let Some(min) = range.min {
				condition = condition.add(search_index::Column::SubcomponentCount.gte(min));
			}
			if let Some(max) = range.max {
				condition = condition.add(search_index::Column::SubcomponentCount.lte(max));
			}
		}

		if let Some(range) = &filters.last_updated {
			if let Some(min) = range.min {
				condition = condition.add(search_index::Column::LastUpdated.gte(min));
			}
			if let Some(max) = range.max {
				condition = condition.add(search_index::Column::LastUpdated.lte(max));
			}
		}

		condition
	}
}

/// Turn free text into an FTS5 MATCH expression of quoted tokens, all required.
///
/// Quoting keeps FTS5 operators and punctuation in user input literal. Returns `None`
/// when the text has no tokens.
pub fn fts_match_expression(text: &str) -> Option<String> {
	let tokens = text
		.split_whitespace()
		.map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
		.collect::<Vec<_>>();

	(!tokens.is_empty()).then(|| tokens.join(" "))
}
