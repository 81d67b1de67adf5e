//! Document merging.

use serde_json::Value;

use super::entry::Document;

/// Apply a JSON merge patch to a document.
///
/// Nested objects merge key by key, `null` removes a key, anything else
/// replaces the existing value.
pub fn merge_patch(target: &mut Document, patch: &Document) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(inner) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Document::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Document::new());
                }
                if let Value::Object(existing) = slot {
                    merge_patch(existing, inner);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Append the incoming locations that are not already present.
///
/// Returns the merged list and how many locations were added. Order is
/// preserved: existing locations first, then new ones as given.
pub fn merge_locations(existing: &[String], incoming: &[String]) -> (Vec<String>, usize) {
    let mut merged = existing.to_vec();
    let mut added = 0;
    for location in incoming {
        if !merged.contains(location) {
            merged.push(location.clone());
            added += 1;
        }
    }
    (merged, added)
}
