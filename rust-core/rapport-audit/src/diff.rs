// SPDX-License-Identifier: PMPL-1.0-or-later
//! Field-level change detection between two row snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields maintained by the storage layer itself. Differences in these do
/// not make an update meaningful.
pub const BOOKKEEPING_FIELDS: &[&str] = &["updated_at"];

/// How one field differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDiff {
    Added { value: Value },
    Removed { value: Value },
    Changed { old: Value, new: Value },
}

/// Per-field differences between `old` and `new`, ignoring the listed
/// fields. Keys present on both sides with equal values are omitted.
pub fn field_diffs(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    ignored: &[&str],
) -> BTreeMap<String, FieldDiff> {
    let mut diffs = BTreeMap::new();

    for (key, old_value) in old {
        if ignored.contains(&key.as_str()) {
            continue;
        }
        match new.get(key) {
            None => {
                diffs.insert(
                    key.clone(),
                    FieldDiff::Removed {
                        value: old_value.clone(),
                    },
                );
            }
            Some(new_value) if new_value != old_value => {
                diffs.insert(
                    key.clone(),
                    FieldDiff::Changed {
                        old: old_value.clone(),
                        new: new_value.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for (key, new_value) in new {
        if ignored.contains(&key.as_str()) || old.contains_key(key) {
            continue;
        }
        diffs.insert(
            key.clone(),
            FieldDiff::Added {
                value: new_value.clone(),
            },
        );
    }

    diffs
}

fn as_object(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Names of the fields that differ, sorted.
///
/// With only one side present (insert or delete) every field of that side
/// counts as changed. With both present, bookkeeping fields are ignored
/// and an empty result means the update was a no-op.
pub fn changed_fields(old: Option<&Value>, new: Option<&Value>) -> Vec<String> {
    match (old, new) {
        (None, None) => Vec::new(),
        (Some(only), None) | (None, Some(only)) => {
            let mut keys: Vec<String> = as_object(Some(only)).keys().cloned().collect();
            keys.sort();
            keys
        }
        (Some(_), Some(_)) => {
            field_diffs(&as_object(old), &as_object(new), BOOKKEEPING_FIELDS)
                .into_keys()
                .collect()
        }
    }
}
