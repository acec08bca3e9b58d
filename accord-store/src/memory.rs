//! In-memory store back-end.
//!
//! All state lives in one `Mutex<Inner>`; each trait method takes the lock
//! once, so every operation is atomic with respect to readers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use accord_core::{compatible, Diff, Document, EntityTag, ForeignKey, Fragment, InternalKey, SourceTag};

use crate::error::StoreError;
use crate::{DiffId, Notification, Store, StoredDiff};

#[derive(Debug)]
struct DiffRow {
    key: InternalKey,
    diff: Diff,
    is_conflict: bool,
    origin: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    next_record: i64,
    next_diff: i64,
    records: BTreeSet<InternalKey>,
    by_foreign: BTreeMap<ForeignKey, i64>,
    by_source: BTreeMap<(InternalKey, SourceTag), String>,
    baselines: BTreeMap<InternalKey, Document>,
    diffs: BTreeMap<DiffId, DiffRow>,
    notifications: Vec<Notification>,
}

/// Ephemeral [`Store`] implementation backed by ordinary maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn create_internal_key(&self, entity: &EntityTag) -> Result<InternalKey, StoreError> {
        let mut inner = self.locked();
        inner.next_record += 1;
        let key = InternalKey::new(entity.clone(), inner.next_record);
        inner.records.insert(key.clone());
        Ok(key)
    }

    fn lookup_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError> {
        let inner = self.locked();
        Ok(inner
            .by_foreign
            .get(fk)
            .map(|id| InternalKey::new(fk.entity.clone(), *id)))
    }

    fn delete_internal_key(&self, key: &InternalKey) -> Result<usize, StoreError> {
        let mut inner = self.locked();
        let mut removed = 0;

        let before = inner.notifications.len();
        inner.notifications.retain(|n| &n.key != key);
        removed += before - inner.notifications.len();

        let diff_ids: Vec<DiffId> = inner
            .diffs
            .iter()
            .filter(|(_, row)| &row.key == key)
            .map(|(id, _)| *id)
            .collect();
        for id in diff_ids {
            inner.diffs.remove(&id);
            removed += 1;
        }

        if inner.baselines.remove(key).is_some() {
            removed += 1;
        }

        let mapped: Vec<(InternalKey, SourceTag)> = inner
            .by_source
            .keys()
            .filter(|(k, _)| k == key)
            .cloned()
            .collect();
        for (k, source) in mapped {
            if let Some(id) = inner.by_source.remove(&(k.clone(), source.clone())) {
                inner
                    .by_foreign
                    .remove(&ForeignKey::new(k.entity.clone(), source, id));
                removed += 1;
            }
        }

        if inner.records.remove(key) {
            removed += 1;
        }
        Ok(removed)
    }

    fn record_foreign_key(&self, key: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError> {
        if !compatible(key, fk) {
            return Err(StoreError::Incompatible {
                key: key.clone(),
                fk: fk.clone(),
            });
        }
        let mut inner = self.locked();
        if !inner.records.contains(key) {
            return Err(StoreError::MissingRecord { key: key.clone() });
        }
        if let Some(mapped) = inner.by_foreign.get(fk) {
            if *mapped != key.id {
                return Err(StoreError::MappingConflict { fk: fk.clone() });
            }
            return Ok(()); // identical mapping already present
        }
        let slot = (key.clone(), fk.source.clone());
        if let Some(existing) = inner.by_source.get(&slot) {
            if existing != &fk.id {
                return Err(StoreError::SourceTaken {
                    key: key.clone(),
                    source_tag: fk.source.clone(),
                });
            }
        }
        inner.by_foreign.insert(fk.clone(), key.id);
        inner.by_source.insert(slot, fk.id.clone());
        Ok(())
    }

    fn lookup_foreign_key(
        &self,
        key: &InternalKey,
        source: &SourceTag,
    ) -> Result<Option<ForeignKey>, StoreError> {
        let inner = self.locked();
        Ok(inner
            .by_source
            .get(&(key.clone(), source.clone()))
            .map(|id| ForeignKey::new(key.entity.clone(), source.clone(), id.clone())))
    }

    fn delete_foreign_key(&self, fk: &ForeignKey) -> Result<(), StoreError> {
        let mut inner = self.locked();
        if let Some(id) = inner.by_foreign.remove(fk) {
            inner
                .by_source
                .remove(&(InternalKey::new(fk.entity.clone(), id), fk.source.clone()));
        }
        Ok(())
    }

    fn delete_foreign_keys(&self, key: &InternalKey) -> Result<(), StoreError> {
        let mut inner = self.locked();
        let mapped: Vec<(InternalKey, SourceTag)> = inner
            .by_source
            .keys()
            .filter(|(k, _)| k == key)
            .cloned()
            .collect();
        for slot in mapped {
            if let Some(id) = inner.by_source.remove(&slot) {
                inner
                    .by_foreign
                    .remove(&ForeignKey::new(slot.0.entity.clone(), slot.1, id));
            }
        }
        Ok(())
    }

    fn record_initial_document(
        &self,
        key: &InternalKey,
        doc: &Document,
    ) -> Result<(), StoreError> {
        let mut inner = self.locked();
        if !inner.records.contains(key) {
            return Err(StoreError::MissingRecord { key: key.clone() });
        }
        inner.baselines.insert(key.clone(), doc.clone());
        Ok(())
    }

    fn lookup_initial_document(&self, key: &InternalKey) -> Result<Option<Document>, StoreError> {
        Ok(self.locked().baselines.get(key).cloned())
    }

    fn delete_initial_document(&self, key: &InternalKey) -> Result<(), StoreError> {
        self.locked().baselines.remove(key);
        Ok(())
    }

    fn record_diffs(
        &self,
        key: &InternalKey,
        merged: &Diff,
        fragments: &[Fragment],
    ) -> Result<DiffId, StoreError> {
        let mut inner = self.locked();
        if !inner.records.contains(key) {
            return Err(StoreError::MissingRecord { key: key.clone() });
        }

        inner.next_diff += 1;
        let merged_id = DiffId(inner.next_diff);
        inner.diffs.insert(
            merged_id,
            DiffRow {
                key: key.clone(),
                diff: merged.clone(),
                is_conflict: false,
                origin: None,
            },
        );

        for fragment in fragments {
            inner.next_diff += 1;
            let id = DiffId(inner.next_diff);
            inner.diffs.insert(
                id,
                DiffRow {
                    key: key.clone(),
                    diff: fragment.diff.clone(),
                    is_conflict: true,
                    origin: Some(fragment.origin),
                },
            );
        }

        if !fragments.is_empty() {
            inner.notifications.push(Notification {
                key: key.clone(),
                diff_id: merged_id,
                recorded_at: Utc::now(),
            });
        }
        Ok(merged_id)
    }

    fn delete_diffs(&self, key: &InternalKey) -> Result<(), StoreError> {
        let mut inner = self.locked();
        inner.diffs.retain(|_, row| &row.key != key);
        inner.notifications.retain(|n| &n.key != key);
        Ok(())
    }

    fn diffs(&self, key: &InternalKey) -> Result<Vec<StoredDiff>, StoreError> {
        let inner = self.locked();
        Ok(inner
            .diffs
            .iter()
            .filter(|(_, row)| &row.key == key)
            .map(|(id, row)| StoredDiff {
                id: *id,
                diff: row.diff.clone(),
                is_conflict: row.is_conflict,
                origin: row.origin,
            })
            .collect())
    }

    fn notifications(&self) -> Result<Vec<Notification>, StoreError> {
        Ok(self.locked().notifications.clone())
    }
}
