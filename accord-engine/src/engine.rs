//! Operation determination and execution.
//!
//! Determination is a pure read over the store and the originating source:
//!
//! | known key? | document? | operation |
//! |---|---|---|
//! | no  | no  | problem (logged, no mutation) |
//! | no  | yes | create |
//! | yes | no  | delete |
//! | yes | yes | update |
//!
//! Execution mutates. Per-source adapter failures during fan-out are logged
//! and accumulated into the outcome, never fatal; store failures abort the
//! request.

use std::sync::{Arc, Mutex, PoisonError};

use accord_core::{apply, diff, merge, Document, ForeignKey, IgnoreConflicts, InternalKey, SourceTag};
use accord_source::SourceError;
use accord_store::{DiffId, Store};

use crate::error::EngineError;
use crate::gateway::Gateway;

// ---------------------------------------------------------------------------
// Operations and outcomes
// ---------------------------------------------------------------------------

/// What one change notice turned out to require.
#[derive(Debug)]
pub enum Operation {
    /// First sighting of a document with no key mapping.
    Create { fk: ForeignKey, doc: Document },
    /// Known record, document still present at the origin.
    Update { key: InternalKey },
    /// Known record, document gone from the origin.
    Delete { key: InternalKey },
    /// Unknown key and no document to go with it.
    Problem { fk: ForeignKey, reason: String },
}

/// A tolerated per-source adapter failure.
#[derive(Debug)]
pub struct SourceFailure {
    pub source: SourceTag,
    pub error: SourceError,
}

/// Result of executing one operation.
#[derive(Debug)]
pub enum Outcome {
    Created {
        key: InternalKey,
        failures: Vec<SourceFailure>,
    },
    Updated {
        key: InternalKey,
        diff_id: DiffId,
        conflicts: usize,
        failures: Vec<SourceFailure>,
    },
    Deleted {
        key: InternalKey,
        removed_rows: usize,
        failures: Vec<SourceFailure>,
    },
    Problem {
        fk: ForeignKey,
        reason: String,
    },
}

impl Outcome {
    pub fn failures(&self) -> &[SourceFailure] {
        match self {
            Outcome::Created { failures, .. }
            | Outcome::Updated { failures, .. }
            | Outcome::Deleted { failures, .. } => failures,
            Outcome::Problem { .. } => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The reconciliation engine for one entity.
pub struct Engine {
    gateway: Gateway,
    store: Arc<dyn Store>,
    // Serialises determine + execute; requests touching the same record must
    // not interleave, and a single guard per entity satisfies that.
    serial: Mutex<()>,
}

impl Engine {
    pub fn new(gateway: Gateway, store: Arc<dyn Store>) -> Self {
        Self {
            gateway,
            store,
            serial: Mutex::new(()),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Reconcile one change notice: determine the operation, then execute it.
    pub fn process(&self, fk: &ForeignKey) -> Result<Outcome, EngineError> {
        let _guard = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        let operation = self.determine(fk)?;
        self.execute(operation)
    }

    /// Classify the notice. Pure with respect to the store and sources.
    pub fn determine(&self, fk: &ForeignKey) -> Result<Operation, EngineError> {
        let known = self.store.lookup_internal_key(fk)?;
        let fetched = match self.gateway.get(fk) {
            Ok(doc) => Ok(doc),
            Err(EngineError::Source(err)) => Err(err),
            Err(other) => return Err(other),
        };

        Ok(match (known, fetched) {
            (None, Err(err)) => Operation::Problem {
                fk: fk.clone(),
                reason: format!("unknown key, no document: {err}"),
            },
            (None, Ok(doc)) => Operation::Create {
                fk: fk.clone(),
                doc,
            },
            (Some(key), Err(_)) => Operation::Delete { key },
            (Some(key), Ok(_)) => Operation::Update { key },
        })
    }

    pub fn execute(&self, operation: Operation) -> Result<Outcome, EngineError> {
        match operation {
            Operation::Create { fk, doc } => self.execute_create(fk, doc),
            Operation::Update { key } => self.execute_update(key),
            Operation::Delete { key } => self.execute_delete(key),
            Operation::Problem { fk, reason } => {
                tracing::warn!(key = %fk, reason = %reason, "reconciliation problem");
                Ok(Outcome::Problem { fk, reason })
            }
        }
    }

    /// Register the record and broadcast its document to every source. The
    /// originating source sees an idempotent rewrite; a flaky source must
    /// not block initial propagation, so write failures are accumulated.
    fn execute_create(&self, fk: ForeignKey, doc: Document) -> Result<Outcome, EngineError> {
        let key = self.store.create_internal_key(&fk.entity)?;
        self.store.record_foreign_key(&key, &fk)?;
        self.store.record_initial_document(&key, &doc)?;

        let docs = vec![doc; self.gateway.source_count()];
        let results = self.gateway.set_all(&key, &docs)?;
        let failures = collect_failures(results.into_iter().map(|(tag, r)| (tag, r.map(|_| ()))));

        tracing::info!(key = %key, origin = %fk, "created record");
        Ok(Outcome::Created { key, failures })
    }

    /// The diff/merge/apply cycle of one update.
    fn execute_update(&self, key: InternalKey) -> Result<Outcome, EngineError> {
        // 1. Fetch every copy; split into surviving documents and failures.
        let fetched = self.gateway.get_all(&key)?;
        let mut failures = Vec::new();
        let mut valid: Vec<(usize, Document)> = Vec::new();
        for (index, (source, result)) in fetched.into_iter().enumerate() {
            match result {
                Ok(doc) => valid.push((index, doc)),
                Err(error) => {
                    tracing::warn!(key = %key, source = %source, error = %error, "source read failed");
                    failures.push(SourceFailure { source, error });
                }
            }
        }

        // 2. The remembered baseline, or a synthesised one for records that
        //    predate baselining. Newly created records always have one.
        let base = match self.store.lookup_initial_document(&key)? {
            Some(doc) => doc,
            None => {
                tracing::warn!(key = %key, "no baseline on record; synthesising from surviving documents");
                synthesise(valid.iter().map(|(_, doc)| doc))
            }
        };

        // 3-4. Diff each copy against the baseline and merge.
        let diffs: Vec<_> = valid.iter().map(|(_, doc)| diff(&base, doc)).collect();
        let (merged, mut fragments) = merge(&IgnoreConflicts, &diffs);
        // Failed sources were skipped above, so fragment origins index the
        // surviving list; relabel them with the true source index.
        for fragment in &mut fragments {
            fragment.origin = valid[fragment.origin].0;
        }

        // 5-6. Apply the unanimous part to every copy, substituting the
        //      baseline for copies that could not be read.
        let outputs: Vec<Document> = (0..self.gateway.source_count())
            .map(|index| {
                let input = valid
                    .iter()
                    .find(|(i, _)| *i == index)
                    .map(|(_, doc)| doc)
                    .unwrap_or(&base);
                apply(&merged, input)
            })
            .collect();

        // 7. Write back; per-source failures accumulate.
        let written = self.gateway.set_all(&key, &outputs)?;
        for (source, result) in written {
            if let Err(error) = result {
                tracing::warn!(key = %key, source = %source, error = %error, "source write failed");
                failures.push(SourceFailure { source, error });
            }
        }

        // 8-9. Record the evidence, then advance the baseline by the
        //      unanimous part only — conflict fragments stay replayable.
        let diff_id = self.store.record_diffs(&key, &merged, &fragments)?;
        self.store
            .record_initial_document(&key, &apply(&merged, &base))?;

        tracing::info!(
            key = %key,
            diff_id = %diff_id,
            conflicts = fragments.len(),
            "updated record"
        );
        Ok(Outcome::Updated {
            key,
            diff_id,
            conflicts: fragments.len(),
            failures,
        })
    }

    /// Remove the record from every mapped source, then cascade-delete it
    /// from the store. Adapter deletes of already-absent documents succeed.
    fn execute_delete(&self, key: InternalKey) -> Result<Outcome, EngineError> {
        let results = self.gateway.delete_all(&key)?;
        let failures = collect_failures(results.into_iter());

        let removed_rows = self.store.delete_internal_key(&key)?;
        tracing::info!(key = %key, removed_rows, "deleted record");
        Ok(Outcome::Deleted {
            key,
            removed_rows,
            failures,
        })
    }
}

/// Keep the failures, log each one.
fn collect_failures(
    results: impl Iterator<Item = (SourceTag, Result<(), SourceError>)>,
) -> Vec<SourceFailure> {
    let mut failures = Vec::new();
    for (source, result) in results {
        if let Err(error) = result {
            tracing::warn!(source = %source, error = %error, "source call failed");
            failures.push(SourceFailure { source, error });
        }
    }
    failures
}

/// Nominal starting document for pre-baseline records: pairwise union of
/// the surviving copies, ties broken by declared source order.
fn synthesise<'a>(docs: impl Iterator<Item = &'a Document>) -> Document {
    let mut base = Document::empty();
    for doc in docs {
        base.absorb(doc);
    }
    base
}
