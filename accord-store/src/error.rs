//! Error types for accord-store.

use thiserror::Error;

use accord_core::{ForeignKey, InternalKey, SourceTag};

/// All errors that can arise from operational-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure (connectivity, transaction, constraint).
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization of a document or diff column.
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A persisted row no longer parses (timestamp or enum column).
    #[error("malformed store row: {detail}")]
    Corrupt { detail: String },

    /// The foreign key already maps to a different record.
    #[error("foreign key {fk} is already mapped to a different record")]
    MappingConflict { fk: ForeignKey },

    /// The (record, source) slot already holds a different foreign key.
    #[error("source '{source_tag}' of {key} already holds a different foreign key")]
    SourceTaken {
        key: InternalKey,
        source_tag: SourceTag,
    },

    /// Entity tags of the key and the foreign key disagree.
    #[error("tag mismatch between {key} and {fk}")]
    Incompatible { key: InternalKey, fk: ForeignKey },

    /// The internal key has no record row.
    #[error("no record for {key}")]
    MissingRecord { key: InternalKey },
}
