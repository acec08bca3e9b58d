//! Identifier model — entity/source tags, internal and foreign keys.
//!
//! Internal keys are Accord-owned, opaque integers allocated by the
//! operational store and never reused. Foreign keys are the opaque string
//! identities the external sources use for the same logical record. Both
//! carry the tags they were minted under; [`compatible`] checks that two
//! identifier-bearing values agree on them.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a kind of record (e.g. `"user"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityTag(pub String);

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EntityTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a location an entity lives in (e.g. `"upstream"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceTag(pub String);

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SourceTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SourceTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Accord-owned identity for one logical record within an entity.
///
/// Allocated exactly once per logical record by the operational store;
/// never reused after deletion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InternalKey {
    pub entity: EntityTag,
    pub id: i64,
}

impl InternalKey {
    pub fn new(entity: impl Into<EntityTag>, id: i64) -> Self {
        Self {
            entity: entity.into(),
            id,
        }
    }
}

impl fmt::Display for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// The key a specific source uses for a logical record.
///
/// At most one per (internal key, source) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub entity: EntityTag,
    pub source: SourceTag,
    pub id: String,
}

impl ForeignKey {
    pub fn new(
        entity: impl Into<EntityTag>,
        source: impl Into<SourceTag>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            source: source.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.entity, self.source, self.id)
    }
}

// ---------------------------------------------------------------------------
// Compatibility
// ---------------------------------------------------------------------------

/// Anything that carries an entity tag and possibly a source tag.
pub trait Tagged {
    fn entity_tag(&self) -> &EntityTag;
    fn source_tag(&self) -> Option<&SourceTag>;
}

impl Tagged for InternalKey {
    fn entity_tag(&self) -> &EntityTag {
        &self.entity
    }

    fn source_tag(&self) -> Option<&SourceTag> {
        None
    }
}

impl Tagged for ForeignKey {
    fn entity_tag(&self) -> &EntityTag {
        &self.entity
    }

    fn source_tag(&self) -> Option<&SourceTag> {
        Some(&self.source)
    }
}

/// Runtime tag agreement between two identifier-bearing values.
///
/// Entities must match exactly; sources must match when both sides carry one.
/// A value without a source tag (an internal key) is compatible with any
/// source of its entity.
pub fn compatible(a: &impl Tagged, b: &impl Tagged) -> bool {
    if a.entity_tag() != b.entity_tag() {
        return false;
    }
    match (a.source_tag(), b.source_tag()) {
        (Some(left), Some(right)) => left == right,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
