//! Search result ordering

use sea_orm::{
	sea_query::{Expr, SimpleExpr},
	EntityTrait, Order, QueryOrder, Select,
};
use serde::{Deserialize, Serialize};

use crate::infra::db::entities::search_index;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
	/// FTS5 rank when the query has text, `last_updated` otherwise
	#[default]
	Relevance,
	Name,
	LastUpdated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
	Asc,
	#[default]
	Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOptions {
	pub field: SortField,
	pub direction: SortDirection,
}

/// Sort builder for index queries
pub struct SortBuilder {
	order: Vec<(SimpleExpr, Order)>,
}

impl SortBuilder {
	pub fn new() -> Self {
		Self { order: Vec::new() }
	}

	/// `fts_match` is the MATCH expression of the query, if it has one.
	pub fn apply_sort(mut self, sort: &SortOptions, fts_match: Option<&str>) -> Self {
		let direction = match sort.direction {
			SortDirection::Asc => Order::Asc,
			SortDirection::Desc => Order::Desc,
		};

		match (sort.field, fts_match) {
			(SortField::Relevance, Some(fts_match)) => {
				// FTS5 rank is lower for better matches, so "descending relevance" is
				// ascending rank
				let rank_order = match direction {
					Order::Desc => Order::Asc,
					_ => Order::Desc,
				};
				self.order.push((
					Expr::cust_with_values(
						"(SELECT rank FROM search_index_fts \
						 WHERE search_index_fts MATCH ? AND rowid = search_index.item_id)",
						[fts_match.to_owned()],
					),
					rank_order,
				));
			}
			(SortField::Relevance, None) | (SortField::LastUpdated, _) => {
				self.order
					.push((Expr::col(search_index::Column::LastUpdated).into(), direction));
			}
			(SortField::Name, _) => {
				self.order
					.push((Expr::col(search_index::Column::Name).into(), direction));
			}
		}

		self
	}

	/// Stable pagination needs a unique last key.
	pub fn tie_break_by_id(mut self) -> Self {
		self.order
			.push((Expr::col(search_index::Column::ItemId).into(), Order::Asc));
		self
	}

	pub fn build(self) -> Vec<(SimpleExpr, Order)> {
		self.order
	}

	pub fn apply<E: EntityTrait>(self, mut select: Select<E>) -> Select<E> {
		for (expr, order) in self.order {
			select = select.order_by(expr, order);
		}
		select
	}
}

impl Default for SortBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn relevance_without_text_falls_back_to_recency() {
		let order = SortBuilder::new()
			.apply_sort(&SortOptions::default(), None)
			.tie_break_by_id()
			.build();

		assert_eq!(order.len(), 2);
		assert_eq!(
			order[0].0,
			SimpleExpr::from(Expr::col(search_index::Column::LastUpdated))
		);
		assert!(matches!(order[0].1, Order::Desc));
		assert!(matches!(order[1].1, Order::Asc));
	}

	#[test]
	fn best_matches_first_means_ascending_rank() {
		let order = SortBuilder::new()
			.apply_sort(&SortOptions::default(), Some("\"sensor\""))
			.build();

		assert!(matches!(order[0].1, Order::Asc));
	}
}
