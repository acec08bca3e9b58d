//! Uniform `get/set/delete` over every registered source of one entity.
//!
//! The gateway owns the entity's adapters in declared source order and
//! translates between internal keys and per-source foreign keys through the
//! store. Single-key calls check tag compatibility and surface adapter
//! faults as typed errors; the `_all` fan-outs return per-source results so
//! partial success is reported, never swallowed.

use std::sync::Arc;

use accord_core::{CoreError, Document, EntitySpec, EntityTag, ForeignKey, InternalKey, SourceTag};
use accord_source::{open_adapter, DataSource, SourceError};
use accord_store::Store;

use crate::error::EngineError;

pub struct Gateway {
    entity: EntityTag,
    adapters: Vec<Box<dyn DataSource>>,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("entity", &self.entity)
            .field("adapters", &self.adapters.len())
            .finish()
    }
}

impl Gateway {
    /// Wrap pre-built adapters. Every adapter must belong to `entity`.
    pub fn new(
        entity: EntityTag,
        adapters: Vec<Box<dyn DataSource>>,
        store: Arc<dyn Store>,
    ) -> Result<Self, EngineError> {
        for adapter in &adapters {
            if adapter.entity() != &entity {
                return Err(EngineError::Incompatible {
                    detail: format!(
                        "adapter for entity '{}' registered under '{}'",
                        adapter.entity(),
                        entity
                    ),
                });
            }
        }
        Ok(Self {
            entity,
            adapters,
            store,
        })
    }

    /// Build the adapters an entity's catalog entry declares.
    pub fn from_spec(spec: &EntitySpec, store: Arc<dyn Store>) -> Result<Self, EngineError> {
        let mut adapters = Vec::with_capacity(spec.sources.len());
        for source in &spec.sources {
            adapters.push(open_adapter(&spec.tag, &source.tag, &source.adapter)?);
        }
        Self::new(spec.tag.clone(), adapters, store)
    }

    pub fn entity(&self) -> &EntityTag {
        &self.entity
    }

    pub fn source_count(&self) -> usize {
        self.adapters.len()
    }

    /// Source tags in declared order.
    pub fn source_tags(&self) -> impl Iterator<Item = &SourceTag> {
        self.adapters.iter().map(|a| a.source())
    }

    pub fn has_source(&self, tag: &SourceTag) -> bool {
        self.source_tags().any(|t| t == tag)
    }

    fn adapter(&self, source: &SourceTag) -> Result<&dyn DataSource, EngineError> {
        self.adapters
            .iter()
            .find(|a| a.source() == source)
            .map(|a| a.as_ref())
            .ok_or_else(|| {
                EngineError::Core(CoreError::UnknownSource {
                    entity: self.entity.clone(),
                    source_tag: source.clone(),
                })
            })
    }

    fn check_key(&self, fk: &ForeignKey) -> Result<(), EngineError> {
        if fk.entity != self.entity {
            return Err(EngineError::Incompatible {
                detail: format!("key {} against entity '{}'", fk, self.entity),
            });
        }
        Ok(())
    }

    fn check_internal(&self, key: &InternalKey) -> Result<(), EngineError> {
        if key.entity != self.entity {
            return Err(EngineError::Incompatible {
                detail: format!("key {} against entity '{}'", key, self.entity),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Single-key calls
    // -----------------------------------------------------------------------

    pub fn get(&self, fk: &ForeignKey) -> Result<Document, EngineError> {
        self.check_key(fk)?;
        Ok(self.adapter(&fk.source)?.get(fk)?)
    }

    pub fn set(&self, doc: &Document, fk: &ForeignKey) -> Result<ForeignKey, EngineError> {
        self.check_key(fk)?;
        Ok(self.adapter(&fk.source)?.set(doc, Some(fk))?)
    }

    pub fn delete(&self, fk: &ForeignKey) -> Result<(), EngineError> {
        self.check_key(fk)?;
        Ok(self.adapter(&fk.source)?.delete(fk)?)
    }

    // -----------------------------------------------------------------------
    // Fan-outs — per-source results in declared order
    // -----------------------------------------------------------------------

    /// Fetch the record from every source. A source without a key mapping
    /// yields `SourceError::UnknownKey`.
    pub fn get_all(
        &self,
        key: &InternalKey,
    ) -> Result<Vec<(SourceTag, Result<Document, SourceError>)>, EngineError> {
        self.check_internal(key)?;
        let mut results = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let tag = adapter.source().clone();
            let fetched = match self.store.lookup_foreign_key(key, &tag)? {
                Some(fk) => adapter.get(&fk),
                None => Err(SourceError::UnknownKey {
                    source_tag: tag.clone(),
                }),
            };
            results.push((tag, fetched));
        }
        Ok(results)
    }

    /// Write one document per source, pairing `docs` with sources in
    /// declared order. A source with no mapping gets a create, and the
    /// returned foreign key is recorded before moving on. Store failures
    /// abort; adapter failures land in the result list.
    pub fn set_all(
        &self,
        key: &InternalKey,
        docs: &[Document],
    ) -> Result<Vec<(SourceTag, Result<ForeignKey, SourceError>)>, EngineError> {
        self.check_internal(key)?;
        if docs.len() != self.adapters.len() {
            return Err(EngineError::Internal(format!(
                "set_all got {} documents for {} sources of '{}'",
                docs.len(),
                self.adapters.len(),
                self.entity
            )));
        }

        let mut results = Vec::with_capacity(self.adapters.len());
        for (adapter, doc) in self.adapters.iter().zip(docs) {
            let tag = adapter.source().clone();
            let known = self.store.lookup_foreign_key(key, &tag)?;
            let written = adapter.set(doc, known.as_ref());
            if known.is_none() {
                if let Ok(new_fk) = &written {
                    self.store.record_foreign_key(key, new_fk)?;
                }
            }
            results.push((tag, written));
        }
        Ok(results)
    }

    /// Delete the record from every source that has a key mapping; sources
    /// without one are skipped as successes.
    pub fn delete_all(
        &self,
        key: &InternalKey,
    ) -> Result<Vec<(SourceTag, Result<(), SourceError>)>, EngineError> {
        self.check_internal(key)?;
        let mut results = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let tag = adapter.source().clone();
            let deleted = match self.store.lookup_foreign_key(key, &tag)? {
                Some(fk) => adapter.delete(&fk),
                None => Ok(()),
            };
            results.push((tag, deleted));
        }
        Ok(results)
    }
}
