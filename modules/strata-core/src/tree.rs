//! Immutable composed state tree.
//!
//! Every write returns a new tree. Snapshots handed out earlier keep pointing
//! at the value they were taken from, so readers never observe a half-applied
//! update and no lock is needed to read one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::path::StatePath;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTree {
    root: Arc<Value>,
}

impl StateTree {
    pub fn new(root: Value) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// A tree whose root is an empty object.
    pub fn empty() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        Arc::try_unwrap(self.root).unwrap_or_else(|shared| (*shared).clone())
    }

    /// True when both handles point at the same snapshot, not merely equal
    /// values.
    pub fn same_snapshot(&self, other: &StateTree) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    pub fn get(&self, path: &StatePath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(self.root.as_ref(), |node, segment| node.get(segment))
    }

    /// Owned value at `path`, `Null` when nothing is stored there.
    pub fn value_at(&self, path: &StatePath) -> Value {
        self.get(path).cloned().unwrap_or(Value::Null)
    }

    /// Replace the value at `path`. Missing or non-object intermediate nodes
    /// are replaced with objects.
    pub fn set(&self, path: &StatePath, value: Value) -> StateTree {
        let mut root = (*self.root).clone();
        set_in(&mut root, path.segments(), value);
        StateTree::new(root)
    }

    /// Shallow-merge the keys of `partial` into the object at `path`,
    /// keeping sibling keys. A missing or null value is treated as `{}`.
    pub fn patch(&self, path: &StatePath, partial: Value) -> Result<StateTree> {
        let Value::Object(partial) = partial else {
            return Err(StoreError::InvalidPatch {
                path: path.to_string(),
                reason: "patch value must be an object".into(),
            });
        };

        let mut merged = match self.get(path) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(existing)) => existing.clone(),
            Some(Value::Array(_)) => {
                return Err(StoreError::InvalidPatch {
                    path: path.to_string(),
                    reason: "patching arrays is not supported".into(),
                })
            }
            Some(_) => {
                return Err(StoreError::InvalidPatch {
                    path: path.to_string(),
                    reason: "patching primitives is not supported".into(),
                })
            }
        };
        merged.extend(partial);

        Ok(self.set(path, Value::Object(merged)))
    }

    /// Shallow-merge the top-level keys of `other` over this tree.
    /// Non-object inputs leave the tree unchanged.
    pub fn merge(&self, other: &Value) -> StateTree {
        let Value::Object(incoming) = other else {
            return self.clone();
        };
        let mut root = match self.root.as_ref() {
            Value::Object(existing) => existing.clone(),
            _ => Map::new(),
        };
        for (key, value) in incoming {
            root.insert(key.clone(), value.clone());
        }
        StateTree::new(Value::Object(root))
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for StateTree {
    fn eq(&self, other: &Self) -> bool {
        self.same_snapshot(other) || self.root == other.root
    }
}

impl From<Value> for StateTree {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

fn set_in(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_in(child, rest, value);
    }
}
