//! # accord-store
//!
//! The operational store behind the reconciliation engine: the persistent
//! mapping between internal and foreign keys, baseline documents, diffs
//! (merged and conflict fragments), and pending-conflict notifications.
//!
//! Two back-ends implement the same [`Store`] trait: [`MemoryStore`] for
//! tests and short-lived runs, [`SqliteStore`] for durable state. Every
//! write is all-or-nothing per operation; readers never observe a
//! half-applied update.

pub mod error;
pub mod memory;
pub mod sqlite;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use accord_core::{Diff, Document, EntityTag, ForeignKey, Fragment, InternalKey, SourceTag};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Identity of one persisted diff row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiffId(pub i64);

impl fmt::Display for DiffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A persisted diff, either the authoritative merged diff of one update or
/// a conflict fragment rejected by the merge policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDiff {
    pub id: DiffId,
    pub diff: Diff,
    pub is_conflict: bool,
    /// For fragments: index of the source the rejected ops came from.
    pub origin: Option<usize>,
}

/// A persisted "this record has unresolved conflicts" flag, referencing the
/// merged diff of the update that produced the fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub key: InternalKey,
    pub diff_id: DiffId,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The operational store contract.
///
/// The read face and the write face are two faces of the same token; both
/// take `&self` and implementations synchronise internally. Contracts per
/// operation:
///
/// - internal keys are allocated exactly once and never reused;
/// - a foreign key maps to at most one internal key, and an
///   (internal key, source) pair to at most one foreign key;
/// - deleting an internal key cascades across every table;
/// - the baseline per internal key is unique and replaced atomically;
/// - diffs are append-only within a record's lifetime;
/// - recording a non-empty fragment list also records a notification.
pub trait Store: Send + Sync {
    /// Allocate and persist a fresh internal key for the entity.
    fn create_internal_key(&self, entity: &EntityTag) -> Result<InternalKey, StoreError>;

    /// Pure read; `None` means the foreign key is unknown.
    fn lookup_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError>;

    /// Cascade-delete the record: baseline, diffs, fragments, notifications,
    /// foreign keys, and the key row itself. Idempotent; returns rows removed.
    fn delete_internal_key(&self, key: &InternalKey) -> Result<usize, StoreError>;

    /// Insert a key mapping. Fails if the foreign key already maps to a
    /// different record, the source slot is already taken, or the tags
    /// disagree.
    fn record_foreign_key(&self, key: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError>;

    /// Pure read.
    fn lookup_foreign_key(
        &self,
        key: &InternalKey,
        source: &SourceTag,
    ) -> Result<Option<ForeignKey>, StoreError>;

    /// Idempotent.
    fn delete_foreign_key(&self, fk: &ForeignKey) -> Result<(), StoreError>;

    /// Idempotent.
    fn delete_foreign_keys(&self, key: &InternalKey) -> Result<(), StoreError>;

    /// Atomically replace the baseline document for the record.
    fn record_initial_document(
        &self,
        key: &InternalKey,
        doc: &Document,
    ) -> Result<(), StoreError>;

    /// Pure read.
    fn lookup_initial_document(&self, key: &InternalKey) -> Result<Option<Document>, StoreError>;

    /// Idempotent.
    fn delete_initial_document(&self, key: &InternalKey) -> Result<(), StoreError>;

    /// Persist `merged` as the authoritative diff of one update and each
    /// fragment as a conflict row under the same record. When `fragments`
    /// is non-empty a notification referencing the merged diff's id is
    /// recorded in the same transaction. Returns the merged diff's id.
    fn record_diffs(
        &self,
        key: &InternalKey,
        merged: &Diff,
        fragments: &[Fragment],
    ) -> Result<DiffId, StoreError>;

    /// Remove all diffs, fragments, and notifications for the record.
    fn delete_diffs(&self, key: &InternalKey) -> Result<(), StoreError>;

    /// All persisted diffs for the record, in insertion order. Pure read.
    fn diffs(&self, key: &InternalKey) -> Result<Vec<StoredDiff>, StoreError>;

    /// All pending-conflict notifications, in insertion order. Pure read.
    fn notifications(&self) -> Result<Vec<Notification>, StoreError>;
}
