//! Error types for accord-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EntityTag, SourceTag};

/// All errors that can arise from catalog and identifier operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse catalog at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.accord/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The catalog YAML file did not exist at the expected path.
    #[error("catalog not found at {path}")]
    CatalogNotFound { path: PathBuf },

    /// The entity tag is not registered in the catalog.
    #[error("unknown entity '{entity}'")]
    UnknownEntity { entity: EntityTag },

    /// The source tag is not declared for the entity.
    #[error("unknown source '{source_tag}' for entity '{entity}'")]
    UnknownSource {
        entity: EntityTag,
        source_tag: SourceTag,
    },
}
