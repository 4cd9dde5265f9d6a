//! Attribute-level structural diff between two snapshots.
//!
//! The diff is display metadata: history rows always carry the full
//! snapshot, so nothing here is needed to restore a state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::Attributes;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Added(Value),
    Removed(Value),
    Modified { old: Value, new: Value },
    /// Both sides are objects; holds the per-key changes inside them.
    Nested(Diff),
}

/// Changed keys and how they changed. Unchanged keys are absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff(BTreeMap<String, Change>);

impl Diff {
    pub fn get(&self, key: &str) -> Option<&Change> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Change)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Compares `after` against the cached pre-mutation state. Without a cached
/// state there is nothing to compare and the result is `None`.
pub fn diff(before: Option<&Attributes>, after: &Attributes) -> Option<Diff> {
    before.map(|before| diff_maps(before, after))
}

fn diff_maps(before: &Map<String, Value>, after: &Map<String, Value>) -> Diff {
    let mut changes = BTreeMap::new();

    for (key, old) in before {
        let change = match after.get(key) {
            None => Change::Removed(old.clone()),
            Some(new) if new == old => continue,
            Some(new) => match (old, new) {
                (Value::Object(old), Value::Object(new)) => Change::Nested(diff_maps(old, new)),
                // arrays, strings and blobs are compared as single leaves
                _ => Change::Modified {
                    old: old.clone(),
                    new: new.clone(),
                },
            },
        };
        changes.insert(key.clone(), change);
    }

    for (key, new) in after {
        if !before.contains_key(key) {
            changes.insert(key.clone(), Change::Added(new.clone()));
        }
    }

    Diff(changes)
}
