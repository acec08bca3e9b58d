//! Structured diffs — three-way diff, apply, and merge under a policy.
//!
//! A diff is an ordered list of path-keyed operations; op order is
//! lexicographic by path and is part of the contract (deterministic apply
//! and merge depend on it).
//!
//! Laws, tested below:
//! - `diff(a, a)` is empty, and `apply(diff(a, a), d) == d`
//! - `apply(diff(a, b), a) == b`
//! - `merge(policy, [d]) == (d, [])`

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, Path};

// ---------------------------------------------------------------------------
// Ops and diffs
// ---------------------------------------------------------------------------

/// One diff operation on a single leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Op {
    /// Add or overwrite the leaf at `path`.
    Insert { path: Path, value: Value },
    /// Remove the leaf at `path`; absent paths are a no-op on apply.
    Delete { path: Path },
}

impl Op {
    pub fn path(&self) -> &Path {
        match self {
            Op::Insert { path, .. } | Op::Delete { path } => path,
        }
    }
}

/// An ordered list of ops transforming one document into another.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff {
    pub ops: Vec<Op>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// The slice of one merge input rejected by the policy, labelled with the
/// index of the input it came from so conflict storage preserves origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub origin: usize,
    pub diff: Diff,
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

/// Compute the ops that transform `base` into `target`.
///
/// Walks both leaf maps in lock-step over sorted paths: absent→present is an
/// insert, present→absent a delete, changed values an overwriting insert.
pub fn diff(base: &Document, target: &Document) -> Diff {
    let old = base.leaves();
    let new = target.leaves();

    let mut paths: BTreeSet<&Path> = old.keys().collect();
    paths.extend(new.keys());

    let mut ops = Vec::new();
    for path in paths {
        match (old.get(path), new.get(path)) {
            (None, Some(value)) => ops.push(Op::Insert {
                path: path.clone(),
                value: value.clone(),
            }),
            (Some(_), None) => ops.push(Op::Delete { path: path.clone() }),
            (Some(before), Some(after)) if before != after => ops.push(Op::Insert {
                path: path.clone(),
                value: after.clone(),
            }),
            _ => {}
        }
    }
    Diff { ops }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Execute a diff against a document, left to right. Total: inserts create
/// intermediate objects, deletes of absent paths do nothing.
pub fn apply(diff: &Diff, doc: &Document) -> Document {
    let mut out = doc.clone();
    for op in &diff.ops {
        match op {
            Op::Insert { path, value } => out.insert(path, value.clone()),
            Op::Delete { path } => out.remove(path),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// What a policy decides for two ops that disagree at the same path.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictRuling {
    /// Reject every op at this path into per-origin fragments.
    RejectAll,
    /// Use this op for the path; nothing is recorded as conflicting.
    Keep(Op),
}

/// Resolves pairs of conflicting ops on the same path. Consulted only on
/// disagreement; identical ops are merged without a ruling.
pub trait MergePolicy {
    fn on_conflict(&self, path: &Path, left: &Op, right: &Op) -> ConflictRuling;
}

/// The required built-in policy: any disagreement rejects both sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreConflicts;

impl MergePolicy for IgnoreConflicts {
    fn on_conflict(&self, _path: &Path, _left: &Op, _right: &Op) -> ConflictRuling {
        ConflictRuling::RejectAll
    }
}

/// Merge N diffs into the unanimous part plus per-origin conflict fragments.
///
/// Ops are grouped by path; a path where every input agrees on the same op
/// contributes that op once. On disagreement the policy rules; `RejectAll`
/// splits every op at the path into its origin's fragment. Stable: a
/// singleton input merges to itself with no fragments.
pub fn merge(policy: &dyn MergePolicy, diffs: &[Diff]) -> (Diff, Vec<Fragment>) {
    let mut by_path: BTreeMap<&Path, Vec<(usize, &Op)>> = BTreeMap::new();
    for (origin, diff) in diffs.iter().enumerate() {
        for op in &diff.ops {
            by_path.entry(op.path()).or_default().push((origin, op));
        }
    }

    let mut merged = Vec::new();
    let mut rejected: BTreeMap<usize, Vec<Op>> = BTreeMap::new();
    'paths: for (path, ops) in &by_path {
        let mut candidate = ops[0].1.clone();
        for (_, op) in &ops[1..] {
            if **op == candidate {
                continue;
            }
            match policy.on_conflict(path, &candidate, op) {
                ConflictRuling::Keep(kept) => candidate = kept,
                ConflictRuling::RejectAll => {
                    for (origin, op) in ops {
                        rejected.entry(*origin).or_default().push((*op).clone());
                    }
                    continue 'paths;
                }
            }
        }
        merged.push(candidate);
    }

    let fragments = rejected
        .into_iter()
        .map(|(origin, ops)| Fragment {
            origin,
            diff: Diff { ops },
        })
        .collect();
    (Diff { ops: merged }, fragments)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
