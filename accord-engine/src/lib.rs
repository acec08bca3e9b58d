//! # accord-engine
//!
//! The reconciliation pipeline: the data-source gateway, the
//! operation-determination state machine and its executor, and the
//! dispatcher that resolves incoming change notices against the catalog.
//!
//! Call [`Dispatcher::dispatch`] with a parsed `(entity, source, key)`
//! triple, or drive a single entity's [`Engine`] directly.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gateway;

pub use dispatch::{ChangeNotice, DispatchOutcome, Dispatcher};
pub use engine::{Engine, Operation, Outcome, SourceFailure};
pub use error::EngineError;
pub use gateway::Gateway;
