//! Read-side snapshots of the catalog tables
//!
//! A [`SourceSnapshot`] carries everything needed to rebuild one index row. Readers only
//! place active, non-deleted master rows in it, so projection never filters again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::index::{LinkedSummary, OwnerSummary};

/// Nested author/contributor entry stored as JSON on the item row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
	pub id: i32,
	pub name: String,
	pub description: Option<String>,
	pub preview_text: Option<String>,
	pub contributors: Vec<Contributor>,
	pub owner_id: Option<i32>,
	pub primary_file_id: Option<i32>,
	pub is_active: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
	pub id: i32,
	pub url: Option<String>,
	pub cdn_url: Option<String>,
	pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSnapshot {
	pub item: SourceItem,
	pub owner: Option<OwnerSummary>,
	pub primary_file: Option<SourceFile>,
	pub categories: Vec<LinkedSummary>,
	pub tags: Vec<LinkedSummary>,
	pub subcomponents: Vec<LinkedSummary>,
}

impl SourceSnapshot {
	/// Snapshot with no related rows, used when building rows by hand.
	pub fn bare(item: SourceItem) -> Self {
		Self {
			item,
			owner: None,
			primary_file: None,
			categories: Vec::new(),
			tags: Vec::new(),
			subcomponents: Vec::new(),
		}
	}
}
