//! Snapshot -> index row projection
//!
//! Pure and deterministic: the same snapshot always yields the same row apart from
//! `last_updated`, which the index store only moves when the content differs.

use chrono::{DateTime, Utc};

use crate::domain::{FileSummary, IndexRow, LinkedSummary, SourceFile, SourceSnapshot};

pub fn project(snapshot: &SourceSnapshot, now: DateTime<Utc>) -> IndexRow {
	let item = &snapshot.item;

	let categories = sorted(&snapshot.categories);
	let tags = sorted(&snapshot.tags);
	let subcomponents = sorted(&snapshot.subcomponents);

	let search_document = search_document(snapshot, &categories, &tags, &subcomponents);

	IndexRow {
		item_id: item.id,
		name: item.name.clone(),
		description: item.description.clone(),
		preview_text: item.preview_text.clone(),
		is_active: item.is_active,
		owner_id: item.owner_id,
		primary_file_id: item.primary_file_id,
		owner: snapshot.owner.clone(),
		primary_file: snapshot.primary_file.as_ref().map(file_summary),
		contributors: item.contributors.clone(),
		category_ids: ids(&categories),
		tag_ids: ids(&tags),
		subcomponent_ids: ids(&subcomponents),
		subcomponent_count: subcomponents.len() as i32,
		categories,
		tags,
		subcomponents,
		search_document,
		item_created_at: item.created_at,
		item_updated_at: item.updated_at,
		last_updated: now,
	}
}

/// Prefers the CDN URL over the raw one.
pub fn file_summary(file: &SourceFile) -> FileSummary {
	FileSummary {
		id: file.id,
		url: file.cdn_url.clone().or_else(|| file.url.clone()),
		mime_type: file.mime_type.clone(),
	}
}

// Ordered by (name, id), deduplicated in case a reader returns a link twice
fn sorted(summaries: &[LinkedSummary]) -> Vec<LinkedSummary> {
	let mut summaries = summaries.to_vec();
	summaries.sort();
	summaries.dedup_by_key(|summary| summary.id);
	summaries
}

fn ids(summaries: &[LinkedSummary]) -> Vec<i32> {
	summaries.iter().map(|summary| summary.id).collect()
}

fn search_document(
	snapshot: &SourceSnapshot,
	categories: &[LinkedSummary],
	tags: &[LinkedSummary],
	subcomponents: &[LinkedSummary],
) -> String {
	let item = &snapshot.item;

	let parts = [Some(item.name.as_str()), item.description.as_deref(), item.preview_text.as_deref()]
		.into_iter()
		.flatten()
		.chain(item.contributors.iter().map(|c| c.name.as_str()))
		.chain(categories.iter().map(|c| c.name.as_str()))
		.chain(tags.iter().map(|t| t.name.as_str()))
		.chain(subcomponents.iter().map(|s| s.name.as_str()))
		.chain(snapshot.owner.iter().map(|o| o.display_name.as_str()))
		.map(str::trim)
		.filter(|part| !part.is_empty())
		.collect::<Vec<_>>();

	parts.join(" ")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::{Contributor, OwnerSummary, SourceItem};
	use chrono::TimeZone;
	use pretty_assertions::assert_eq;

	fn at(secs: i64) -> DateTime<Utc> {
		Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
	}

	fn linked(name: &str, id: i32) -> LinkedSummary {
		LinkedSummary {
			name: name.to_string(),
			id,
			slug: Some(name.to_lowercase()),
		}
	}

	fn snapshot() -> SourceSnapshot {
		SourceSnapshot {
			item: SourceItem {
				id: 7,
				name: "Relay board".to_string(),
				description: Some("Four channel".to_string()),
				preview_text: Some("  ".to_string()),
				contributors: vec![Contributor {
					name: "Ada".to_string(),
					role: Some("author".to_string()),
				}],
				owner_id: Some(3),
				primary_file_id: Some(9),
				is_active: true,
				created_at: at(1_000),
				updated_at: at(2_000),
			},
			owner: Some(OwnerSummary {
				id: 3,
				display_name: "Workshop".to_string(),
				email: None,
				avatar_url: None,
			}),
			primary_file: Some(SourceFile {
				id: 9,
				url: Some("https://origin/board.png".to_string()),
				cdn_url: Some("https://cdn/board.png".to_string()),
				mime_type: Some("image/png".to_string()),
			}),
			categories: vec![linked("Power", 4), linked("Automation", 2)],
			tags: vec![linked("relay", 11), linked("relay", 11)],
			subcomponents: vec![linked("Coil", 5), linked("Coil", 1)],
		}
	}

	#[test]
	fn builds_document_in_field_order() {
		let row = project(&snapshot(), at(3_000));

		assert_eq!(
			row.search_document,
			"Relay board Four channel Ada Automation Power relay Coil Coil Workshop"
		);
	}

	#[test]
	fn arrays_are_sorted_and_parallel() {
		let row = project(&snapshot(), at(3_000));

		assert_eq!(row.category_ids, vec![2, 4]);
		assert_eq!(row.tag_ids, vec![11]);
		assert_eq!(row.subcomponent_ids, vec![1, 5]);
		assert_eq!(row.subcomponent_count, 2);
		assert_eq!(
			row.categories.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
			vec!["Automation", "Power"]
		);
	}

	#[test]
	fn prefers_cdn_url() {
		let row = project(&snapshot(), at(3_000));
		let file = row.primary_file.expect("file summary");
		assert_eq!(file.url.as_deref(), Some("https://cdn/board.png"));

		let raw_only = SourceFile {
			id: 1,
			url: Some("https://origin/a".to_string()),
			cdn_url: None,
			mime_type: None,
		};
		assert_eq!(file_summary(&raw_only).url.as_deref(), Some("https://origin/a"));
	}

	#[test]
	fn projection_is_deterministic() {
		let mut shuffled = snapshot();
		shuffled.categories.reverse();
		shuffled.subcomponents.reverse();

		assert_eq!(project(&snapshot(), at(5)), project(&shuffled, at(5)));
	}

	#[test]
	fn bare_snapshot_has_empty_aggregates() {
		let row = project(&SourceSnapshot::bare(snapshot().item), at(5));

		assert!(row.owner.is_none());
		assert!(row.primary_file.is_none());
		assert!(row.categories.is_empty());
		assert_eq!(row.search_document, "Relay board Four channel Ada");
	}
}
