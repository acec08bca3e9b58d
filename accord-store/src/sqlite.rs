//! SQLite store back-end.
//!
//! One connection behind a `Mutex`; every mutating operation runs inside a
//! `rusqlite` transaction so readers never observe a half-applied update.
//! Unique indexes on the `foreign_keys` table back the two mapping
//! invariants at the schema level; the pre-checks in `record_foreign_key`
//! exist to turn violations into typed errors instead of constraint faults.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use accord_core::{compatible, Diff, Document, EntityTag, ForeignKey, Fragment, InternalKey, SourceTag};

use crate::error::StoreError;
use crate::{DiffId, Notification, Store, StoredDiff};

/// Durable [`Store`] implementation backed by SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS foreign_keys (
                entity TEXT NOT NULL,
                id INTEGER NOT NULL REFERENCES records(id),
                source TEXT NOT NULL,
                fk TEXT NOT NULL,
                UNIQUE (entity, source, fk),
                UNIQUE (entity, id, source)
            );

            CREATE TABLE IF NOT EXISTS baselines (
                id INTEGER PRIMARY KEY REFERENCES records(id),
                entity TEXT NOT NULL,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS diffs (
                diff_id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                id INTEGER NOT NULL REFERENCES records(id),
                content TEXT NOT NULL,
                is_conflict INTEGER NOT NULL DEFAULT 0,
                origin INTEGER
            );

            CREATE TABLE IF NOT EXISTS notifications (
                entity TEXT NOT NULL,
                id INTEGER NOT NULL REFERENCES records(id),
                diff_id INTEGER NOT NULL REFERENCES diffs(diff_id),
                recorded_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn locked(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The record row must exist before dependent rows may be written.
fn ensure_record(tx: &Transaction<'_>, key: &InternalKey) -> Result<(), StoreError> {
    let entity: Option<String> = tx
        .query_row(
            "SELECT entity FROM records WHERE id = ?1",
            params![key.id],
            |row| row.get(0),
        )
        .optional()?;
    match entity {
        Some(tag) if tag == key.entity.0 => Ok(()),
        _ => Err(StoreError::MissingRecord { key: key.clone() }),
    }
}

impl Store for SqliteStore {
    fn create_internal_key(&self, entity: &EntityTag) -> Result<InternalKey, StoreError> {
        let conn = self.locked();
        conn.execute(
            "INSERT INTO records (entity) VALUES (?1)",
            params![entity.0],
        )?;
        Ok(InternalKey::new(entity.clone(), conn.last_insert_rowid()))
    }

    fn lookup_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError> {
        let conn = self.locked();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
                params![fk.entity.0, fk.source.0, fk.id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| InternalKey::new(fk.entity.clone(), id)))
    }

    fn delete_internal_key(&self, key: &InternalKey) -> Result<usize, StoreError> {
        let mut conn = self.locked();
        let tx = conn.transaction()?;
        let mut removed = 0;
        removed += tx.execute(
            "DELETE FROM notifications WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        removed += tx.execute(
            "DELETE FROM diffs WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        removed += tx.execute(
            "DELETE FROM baselines WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        removed += tx.execute(
            "DELETE FROM foreign_keys WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        removed += tx.execute(
            "DELETE FROM records WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn record_foreign_key(&self, key: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError> {
        if !compatible(key, fk) {
            return Err(StoreError::Incompatible {
                key: key.clone(),
                fk: fk.clone(),
            });
        }
        let mut conn = self.locked();
        let tx = conn.transaction()?;
        ensure_record(&tx, key)?;

        let mapped: Option<i64> = tx
            .query_row(
                "SELECT id FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
                params![fk.entity.0, fk.source.0, fk.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(mapped) = mapped {
            if mapped != key.id {
                return Err(StoreError::MappingConflict { fk: fk.clone() });
            }
            return Ok(()); // identical mapping already present
        }

        let taken: Option<String> = tx
            .query_row(
                "SELECT fk FROM foreign_keys WHERE entity = ?1 AND id = ?2 AND source = ?3",
                params![key.entity.0, key.id, fk.source.0],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::SourceTaken {
                key: key.clone(),
                source_tag: fk.source.clone(),
            });
        }

        tx.execute(
            "INSERT INTO foreign_keys (entity, id, source, fk) VALUES (?1, ?2, ?3, ?4)",
            params![key.entity.0, key.id, fk.source.0, fk.id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lookup_foreign_key(
        &self,
        key: &InternalKey,
        source: &SourceTag,
    ) -> Result<Option<ForeignKey>, StoreError> {
        let conn = self.locked();
        let id: Option<String> = conn
            .query_row(
                "SELECT fk FROM foreign_keys WHERE entity = ?1 AND id = ?2 AND source = ?3",
                params![key.entity.0, key.id, source.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| ForeignKey::new(key.entity.clone(), source.clone(), id)))
    }

    fn delete_foreign_key(&self, fk: &ForeignKey) -> Result<(), StoreError> {
        self.locked().execute(
            "DELETE FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
            params![fk.entity.0, fk.source.0, fk.id],
        )?;
        Ok(())
    }

    fn delete_foreign_keys(&self, key: &InternalKey) -> Result<(), StoreError> {
        self.locked().execute(
            "DELETE FROM foreign_keys WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        Ok(())
    }

    fn record_initial_document(
        &self,
        key: &InternalKey,
        doc: &Document,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(doc)?;
        let mut conn = self.locked();
        let tx = conn.transaction()?;
        ensure_record(&tx, key)?;
        // Invariant: the baseline is unique per record; replacement is a
        // delete-then-insert inside one transaction.
        tx.execute(
            "DELETE FROM baselines WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        tx.execute(
            "INSERT INTO baselines (id, entity, document) VALUES (?1, ?2, ?3)",
            params![key.id, key.entity.0, json],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lookup_initial_document(&self, key: &InternalKey) -> Result<Option<Document>, StoreError> {
        let conn = self.locked();
        let json: Option<String> = conn
            .query_row(
                "SELECT document FROM baselines WHERE entity = ?1 AND id = ?2",
                params![key.entity.0, key.id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    fn delete_initial_document(&self, key: &InternalKey) -> Result<(), StoreError> {
        self.locked().execute(
            "DELETE FROM baselines WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        Ok(())
    }

    fn record_diffs(
        &self,
        key: &InternalKey,
        merged: &Diff,
        fragments: &[Fragment],
    ) -> Result<DiffId, StoreError> {
        let merged_json = serde_json::to_string(merged)?;
        let fragment_json: Vec<(usize, String)> = fragments
            .iter()
            .map(|f| serde_json::to_string(&f.diff).map(|json| (f.origin, json)))
            .collect::<Result<_, _>>()?;

        let mut conn = self.locked();
        let tx = conn.transaction()?;
        ensure_record(&tx, key)?;

        tx.execute(
            "INSERT INTO diffs (entity, id, content, is_conflict) VALUES (?1, ?2, ?3, 0)",
            params![key.entity.0, key.id, merged_json],
        )?;
        let merged_id = DiffId(tx.last_insert_rowid());

        for (origin, json) in &fragment_json {
            tx.execute(
                "INSERT INTO diffs (entity, id, content, is_conflict, origin)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![key.entity.0, key.id, json, *origin as i64],
            )?;
        }

        if !fragments.is_empty() {
            tx.execute(
                "INSERT INTO notifications (entity, id, diff_id, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.entity.0, key.id, merged_id.0, Utc::now().to_rfc3339()],
            )?;
        }
        tx.commit()?;
        Ok(merged_id)
    }

    fn delete_diffs(&self, key: &InternalKey) -> Result<(), StoreError> {
        let mut conn = self.locked();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM notifications WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        tx.execute(
            "DELETE FROM diffs WHERE entity = ?1 AND id = ?2",
            params![key.entity.0, key.id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn diffs(&self, key: &InternalKey) -> Result<Vec<StoredDiff>, StoreError> {
        let conn = self.locked();
        let mut stmt = conn.prepare(
            "SELECT diff_id, content, is_conflict, origin FROM diffs
             WHERE entity = ?1 AND id = ?2 ORDER BY diff_id",
        )?;
        let rows = stmt.query_map(params![key.entity.0, key.id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, content, is_conflict, origin) = row?;
            out.push(StoredDiff {
                id: DiffId(id),
                diff: serde_json::from_str(&content)?,
                is_conflict,
                origin: origin.map(|o| o as usize),
            });
        }
        Ok(out)
    }

    fn notifications(&self) -> Result<Vec<Notification>, StoreError> {
        let conn = self.locked();
        let mut stmt = conn.prepare(
            "SELECT entity, id, diff_id, recorded_at FROM notifications ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (entity, id, diff_id, recorded_at) = row?;
            let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                .map_err(|e| StoreError::Corrupt {
                    detail: format!("notification timestamp: {e}"),
                })?
                .with_timezone(&Utc);
            out.push(Notification {
                key: InternalKey::new(entity, id),
                diff_id: DiffId(diff_id),
                recorded_at,
            });
        }
        Ok(out)
    }
}
