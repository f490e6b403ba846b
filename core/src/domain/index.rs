//! Search index row
//!
//! One denormalized row per non-deleted item. Written exclusively by the aggregator,
//! read-only for everyone else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::source::Contributor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSummary {
	pub id: i32,
	pub display_name: String,
	pub email: Option<String>,
	pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
	pub id: i32,
	/// CDN URL when one exists, raw URL otherwise
	pub url: Option<String>,
	pub mime_type: Option<String>,
}

/// Category, tag or sub-component summary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkedSummary {
	pub name: String,
	pub id: i32,
	pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRow {
	pub item_id: i32,
	pub name: String,
	pub description: Option<String>,
	pub preview_text: Option<String>,
	pub is_active: bool,

	pub owner_id: Option<i32>,
	pub primary_file_id: Option<i32>,
	pub owner: Option<OwnerSummary>,
	pub primary_file: Option<FileSummary>,
	pub contributors: Vec<Contributor>,

	pub categories: Vec<LinkedSummary>,
	pub tags: Vec<LinkedSummary>,
	pub subcomponents: Vec<LinkedSummary>,

	// Bare ID arrays for containment filters
	pub category_ids: Vec<i32>,
	pub tag_ids: Vec<i32>,
	pub subcomponent_ids: Vec<i32>,
	pub subcomponent_count: i32,

	pub search_document: String,

	pub item_created_at: DateTime<Utc>,
	pub item_updated_at: DateTime<Utc>,
	pub last_updated: DateTime<Utc>,
}
