//! # accord-source
//!
//! Data-source adapters: the uniform contract a source implements, plus the
//! two built-in back-ends — a JSON-file directory and a subprocess runner.
//!
//! Constructing an adapter is its `initialise`; dropping it is `finalise`.
//! Adapters do plain blocking I/O and report faults as [`SourceError`]
//! values; they never panic on bad input.

pub mod command;
pub mod dir;
pub mod error;

use accord_core::{AdapterSpec, Document, EntityTag, ForeignKey, SourceTag};

pub use command::CommandSource;
pub use dir::DirSource;
pub use error::SourceError;

/// One (entity, source) pair's adapter.
pub trait DataSource: Send + Sync {
    fn entity(&self) -> &EntityTag;
    fn source(&self) -> &SourceTag;

    /// Fetch the document the source holds under `fk`.
    fn get(&self, fk: &ForeignKey) -> Result<Document, SourceError>;

    /// Write `doc`. Without an fk this is a create and the source allocates
    /// the key; with one it is an update. Either way the returned foreign
    /// key is the definitive one to record.
    fn set(&self, doc: &Document, fk: Option<&ForeignKey>) -> Result<ForeignKey, SourceError>;

    /// Remove the document under `fk`. Deleting an already-absent document
    /// succeeds.
    fn delete(&self, fk: &ForeignKey) -> Result<(), SourceError>;
}

/// Build the adapter a catalog entry declares.
pub fn open_adapter(
    entity: &EntityTag,
    source: &SourceTag,
    spec: &AdapterSpec,
) -> Result<Box<dyn DataSource>, SourceError> {
    match spec {
        AdapterSpec::Directory { root } => Ok(Box::new(DirSource::open(
            entity.clone(),
            source.clone(),
            root.clone(),
        )?)),
        AdapterSpec::Command { get, set, delete } => Ok(Box::new(CommandSource::new(
            entity.clone(),
            source.clone(),
            get.clone(),
            set.clone(),
            delete.clone(),
        )?)),
    }
}
