//! Error types for accord-daemon.

use std::path::PathBuf;

use thiserror::Error;

use accord_core::CoreError;
use accord_engine::EngineError;
use accord_store::StoreError;

/// All errors that can arise from the daemon runtime and its clients.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization of a protocol frame.
    #[error("protocol JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No daemon socket — the daemon is not running.
    #[error("daemon is not running (no socket at {socket})")]
    NotRunning { socket: PathBuf },

    /// Malformed or unexpected protocol traffic.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Catalog failure at startup.
    #[error("catalog error: {0}")]
    Core(#[from] CoreError),

    /// Operational-store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Engine failure while handling a notification.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Convenience constructor for [`DaemonError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
