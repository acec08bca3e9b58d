//! Error types for accord-source.

use std::path::PathBuf;

use thiserror::Error;

use accord_core::{ForeignKey, SourceTag};

/// All errors a data-source adapter can report.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source holds no document under the foreign key.
    #[error("no document for {fk}")]
    NotFound { fk: ForeignKey },

    /// The store holds no foreign-key mapping for this source.
    #[error("no foreign key mapped for source '{source_tag}'")]
    UnknownKey { source_tag: SourceTag },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source produced unparsable JSON.
    #[error("invalid document from source: {0}")]
    Decode(#[from] serde_json::Error),

    /// The foreign-key id cannot name a record in this source.
    #[error("invalid foreign key id '{id}'")]
    InvalidKey { id: String },

    /// An argv template was empty.
    #[error("empty command template for '{action}'")]
    EmptyTemplate { action: &'static str },

    /// The subprocess exited non-zero or was killed.
    #[error("command '{program}' failed (status {status:?}): {stderr}")]
    Command {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    /// A create returned no foreign key on stdout.
    #[error("command '{program}' returned no foreign key")]
    MissingKey { program: String },
}

/// Convenience constructor for [`SourceError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.into(),
        source,
    }
}
