//! Opaque JSON documents and the field paths that address them.
//!
//! A document is a labelled tree: objects are interior nodes, everything
//! else (scalars, arrays, and the empty object) is a leaf. Paths are finite
//! sequences of field names, ordered lexicographically by segment — that
//! order is part of the diff contract.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Path
// ---------------------------------------------------------------------------

/// A sequence of field names addressing one leaf of a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Parse a dot-separated path (`"address.street"`).
impl From<&str> for Path {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            return Self::root();
        }
        Self(s.split('.').map(str::to_owned).collect())
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An opaque JSON value treated as a labelled tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The empty object — the nominal starting document.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// All leaves of the tree, keyed by path, in path order.
    ///
    /// Non-empty objects are interior nodes; every other value (including
    /// the empty object) is emitted as a leaf, so a document is exactly
    /// reconstructible from its leaf map.
    pub fn leaves(&self) -> BTreeMap<Path, Value> {
        let mut out = BTreeMap::new();
        collect_leaves(&mut out, &mut Vec::new(), &self.0);
        out
    }

    /// The value at `path`, if the path resolves.
    pub fn get(&self, path: &Path) -> Option<&Value> {
        let mut node = &self.0;
        for segment in path.segments() {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    /// Set the value at `path`, creating intermediate objects as needed.
    ///
    /// A scalar in the way of an intermediate segment is overwritten by a
    /// fresh object; the root path replaces the whole document.
    pub fn insert(&mut self, path: &Path, value: Value) {
        let Some((last, parents)) = path.segments().split_last() else {
            self.0 = value;
            return;
        };
        let mut node = &mut self.0;
        for segment in parents {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            match node {
                Value::Object(map) => {
                    node = map.entry(segment.clone()).or_insert(Value::Null);
                }
                _ => return,
            }
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            map.insert(last.clone(), value);
        }
    }

    /// Remove the leaf at `path`; a nonexistent path is a no-op.
    ///
    /// Interior objects emptied by the removal are pruned, so removing the
    /// last leaf of a subtree removes the subtree.
    pub fn remove(&mut self, path: &Path) {
        if path.is_root() {
            self.0 = Value::Object(Map::new());
            return;
        }
        if let Value::Object(map) = &mut self.0 {
            remove_pruning(map, path.segments());
        }
    }

    /// Left-biased union: take every leaf of `other` that this document
    /// does not already cover (either the leaf itself, or a shadowing value
    /// anywhere along its path).
    pub fn absorb(&mut self, other: &Document) {
        for (path, value) in other.leaves() {
            if self.covers(&path) {
                continue;
            }
            self.insert(&path, value);
        }
    }

    fn covers(&self, path: &Path) -> bool {
        let mut node = &self.0;
        for segment in path.segments() {
            match node {
                Value::Object(map) => match map.get(segment) {
                    Some(child) => node = child,
                    None => return false,
                },
                // A leaf shadows everything beneath it.
                _ => return true,
            }
        }
        true
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn collect_leaves(out: &mut BTreeMap<Path, Value>, prefix: &mut Vec<String>, value: &Value) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                prefix.push(key.clone());
                collect_leaves(out, prefix, child);
                prefix.pop();
            }
        }
        leaf => {
            out.insert(Path(prefix.clone()), leaf.clone());
        }
    }
}

/// Remove the leaf addressed by `segments`; returns whether it was removed.
/// Empties left behind on the removal path are pruned on the way back up.
fn remove_pruning(map: &mut Map<String, Value>, segments: &[String]) -> bool {
    let [head, rest @ ..] = segments else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(head).is_some();
    }
    let Some(Value::Object(child)) = map.get_mut(head) else {
        return false;
    };
    let removed = remove_pruning(child, rest);
    if removed && child.is_empty() {
        map.remove(head);
    }
    removed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
