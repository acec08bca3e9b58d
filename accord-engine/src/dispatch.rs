//! Resolve incoming change notices against the catalog.
//!
//! Unknown entity or source tags are logged and ignored — returning success
//! preserves at-least-once delivery for the upstream notifier. Known tags
//! produce a strongly-typed foreign key and run the entity's engine.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use accord_core::{Catalog, EntityTag, ForeignKey, SourceTag};
use accord_store::Store;

use crate::engine::{Engine, Outcome};
use crate::error::EngineError;
use crate::gateway::Gateway;

/// A parsed change notification: "this key may have changed at this source".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub entity: String,
    pub source: String,
    pub key: String,
}

/// What dispatching one notice did.
#[derive(Debug)]
pub enum DispatchOutcome {
    Handled(Outcome),
    /// The notice named tags outside the catalog and was dropped.
    Ignored { reason: String },
}

/// One engine per registered entity, keyed by tag.
pub struct Dispatcher {
    engines: HashMap<EntityTag, Engine>,
}

impl Dispatcher {
    /// Build an engine (gateway + adapters) for every catalog entity.
    pub fn new(catalog: &Catalog, store: Arc<dyn Store>) -> Result<Self, EngineError> {
        let mut engines = HashMap::new();
        for spec in &catalog.entities {
            let gateway = Gateway::from_spec(spec, store.clone())?;
            engines.insert(spec.tag.clone(), Engine::new(gateway, store.clone()));
        }
        Ok(Self { engines })
    }

    /// The engine for one entity, if registered.
    pub fn engine(&self, entity: &EntityTag) -> Option<&Engine> {
        self.engines.get(entity)
    }

    /// Resolve and run one notice.
    pub fn dispatch(&self, notice: &ChangeNotice) -> Result<DispatchOutcome, EngineError> {
        let entity = EntityTag::from(notice.entity.as_str());
        let source = SourceTag::from(notice.source.as_str());

        let Some(engine) = self.engines.get(&entity) else {
            tracing::warn!(entity = %entity, "ignoring notice for unknown entity");
            return Ok(DispatchOutcome::Ignored {
                reason: format!("unknown entity '{entity}'"),
            });
        };
        if !engine.gateway().has_source(&source) {
            tracing::warn!(entity = %entity, source = %source, "ignoring notice for unknown source");
            return Ok(DispatchOutcome::Ignored {
                reason: format!("unknown source '{source}' for entity '{entity}'"),
            });
        }

        let fk = ForeignKey::new(entity, source, notice.key.clone());
        engine.process(&fk).map(DispatchOutcome::Handled)
    }
}
