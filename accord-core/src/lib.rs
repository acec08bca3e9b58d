//! Accord core library — identifiers, catalog, documents, diffs.
//!
//! Public API surface:
//! - [`types`] — entity/source tags, internal and foreign keys, compatibility
//! - [`catalog`] — the (entity → sources) catalog and its YAML persistence
//! - [`document`] — opaque JSON documents and field paths
//! - [`diff`] — structured diffs: three-way diff, apply, merge under a policy
//! - [`error`] — [`CoreError`]

pub mod catalog;
pub mod diff;
pub mod document;
pub mod error;
pub mod types;

pub use catalog::{AdapterSpec, Catalog, EntitySpec, SourceSpec};
pub use diff::{apply, diff, merge, ConflictRuling, Diff, Fragment, IgnoreConflicts, MergePolicy, Op};
pub use document::{Document, Path};
pub use error::CoreError;
pub use types::{compatible, EntityTag, ForeignKey, InternalKey, SourceTag, Tagged};
