use crate::models::{DestinationItem, SourceItem};
use std::collections::HashSet;

/// Bulk migration is only offered for source catalogs at least this large.
pub const MIN_ELIGIBLE_ITEMS: usize = 20;

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Source items with no destination item of the same normalized name.
///
/// Items whose name normalizes to the empty string can never be matched and are left out,
/// so nameless products are never migrated.
pub fn compute_missing(source: &[SourceItem], destination: &[DestinationItem]) -> Vec<SourceItem> {
    let existing: HashSet<String> = destination
        .iter()
        .map(|item| normalize_name(&item.title))
        .filter(|title| !title.is_empty())
        .collect();

    source
        .iter()
        .filter(|item| {
            let key = normalize_name(&item.name);
            !key.is_empty() && !existing.contains(&key)
        })
        .cloned()
        .collect()
}

pub fn is_eligible(source_count: usize) -> bool {
    source_count >= MIN_ELIGIBLE_ITEMS
}
