//! Error types for accord-engine.

use thiserror::Error;

use accord_core::CoreError;
use accord_source::SourceError;
use accord_store::StoreError;

/// All errors that can arise from gateway and engine operations.
///
/// Per-source adapter faults during fan-out never surface here — they are
/// accumulated into the outcome. A `Source` variant escapes only from the
/// single-key gateway calls, where the caller decides what absence means.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Catalog resolution failure (unknown entity or source).
    #[error("catalog error: {0}")]
    Core(#[from] CoreError),

    /// Operational-store failure — fatal to the request.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A single-key adapter call failed.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Tag mismatch between a data source and a key or document.
    #[error("tag mismatch: {detail}")]
    Incompatible { detail: String },

    /// Invariant violated — aborts the request, never the process.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}
