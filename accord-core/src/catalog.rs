//! Catalog load/save and registration logic.
//!
//! The catalog declares, for every entity, the ordered list of sources it
//! lives in and how to reach each source. Declared source order is part of
//! the reconciliation contract (it breaks ties during baseline synthesis and
//! fixes the fan-out order), so it is preserved verbatim.
//!
//! **Core API** (`_at` variants): accept an explicit `home: &Path` — used in
//! tests with `TempDir` so that no test ever touches the real `~/.accord`.
//!
//! **Convenience wrappers**: `load()`, `save()`, `register()` derive `home`
//! from `dirs::home_dir()` and delegate to the `_at` variants.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{EntityTag, SourceTag};

// ---------------------------------------------------------------------------
// Catalog types
// ---------------------------------------------------------------------------

/// How to reach one source of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AdapterSpec {
    /// One JSON file per record under `root`.
    Directory { root: PathBuf },
    /// Subprocess adapter: argv templates with `${fk}` holes.
    Command {
        get: Vec<String>,
        set: Vec<String>,
        delete: Vec<String>,
    },
}

/// One declared source of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub tag: SourceTag,
    pub adapter: AdapterSpec,
}

/// One registered entity and its ordered sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub tag: EntityTag,
    pub sources: Vec<SourceSpec>,
}

impl EntitySpec {
    /// The declared source with the given tag.
    pub fn source(&self, tag: &SourceTag) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| &s.tag == tag)
    }

    /// Source tags in declared order.
    pub fn source_tags(&self) -> impl Iterator<Item = &SourceTag> {
        self.sources.iter().map(|s| &s.tag)
    }
}

/// Root of the Accord YAML catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub version: u32,
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Catalog {
    /// The registered entity with the given tag.
    pub fn entity(&self, tag: &EntityTag) -> Option<&EntitySpec> {
        self.entities.iter().find(|e| &e.tag == tag)
    }

    /// Resolve an (entity, source) tag pair against the catalog.
    ///
    /// An unregistered pair is rejected with `UnknownEntity` / `UnknownSource`.
    pub fn resolve(
        &self,
        entity: &EntityTag,
        source: &SourceTag,
    ) -> Result<(&EntitySpec, &SourceSpec), CoreError> {
        let spec = self.entity(entity).ok_or_else(|| CoreError::UnknownEntity {
            entity: entity.clone(),
        })?;
        let source_spec = spec.source(source).ok_or_else(|| CoreError::UnknownSource {
            entity: entity.clone(),
            source_tag: source.clone(),
        })?;
        Ok((spec, source_spec))
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Returns `<home>/.accord/catalog.yaml` without touching the filesystem.
pub fn catalog_path_at(home: &Path) -> PathBuf {
    home.join(".accord").join("catalog.yaml")
}

/// Returns `~/.accord/catalog.yaml`.
pub fn catalog_path() -> Result<PathBuf, CoreError> {
    Ok(catalog_path_at(&home()?))
}

/// Ensures `<home>/.accord/` exists with mode `0700` and returns its path.
pub fn catalog_dir_at(home: &Path) -> Result<PathBuf, CoreError> {
    let dir = home.join(".accord");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load the catalog from `<home>/.accord/catalog.yaml`.
///
/// Returns `CoreError::CatalogNotFound` if absent,
/// `CoreError::Parse` (with path + line context) if malformed.
pub fn load_at(home: &Path) -> Result<Catalog, CoreError> {
    let path = catalog_path_at(home);
    if !path.exists() {
        return Err(CoreError::CatalogNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let catalog: Catalog =
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?;
    Ok(catalog)
}

/// Load the catalog from `~/.accord/catalog.yaml`.
pub fn load() -> Result<Catalog, CoreError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the catalog under `<home>/.accord/catalog.yaml`.
///
/// Writes to a `.tmp` sibling (same directory = same filesystem), sets
/// `0600` permissions, then renames atomically.
pub fn save_at(catalog: &Catalog, home: &Path) -> Result<(), CoreError> {
    let path = catalog_path_at(home);
    catalog_dir_at(home)?; // ensure dir + perms

    let tmp_path = path.with_file_name("catalog.yaml.tmp");
    let yaml = serde_yaml::to_string(catalog)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Atomically save the catalog to `~/.accord/catalog.yaml`.
pub fn save(catalog: &Catalog) -> Result<(), CoreError> {
    save_at(catalog, &home()?)
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register (or replace) an entity in the catalog under `home`.
///
/// If a catalog already exists, the entity is appended; re-registering an
/// existing tag replaces its source list. Saved atomically.
pub fn register_at(spec: EntitySpec, home: &Path) -> Result<Catalog, CoreError> {
    let now = Utc::now();
    let mut catalog = match load_at(home) {
        Ok(c) => c,
        Err(CoreError::CatalogNotFound { .. }) => Catalog {
            version: 1,
            entities: vec![],
            created_at: now,
            updated_at: now,
        },
        Err(e) => return Err(e),
    };

    match catalog.entities.iter_mut().find(|e| e.tag == spec.tag) {
        Some(existing) => *existing = spec,
        None => catalog.entities.push(spec),
    }
    catalog.updated_at = now;

    save_at(&catalog, home)?;
    Ok(catalog)
}

/// Register an entity using `~/.accord` as home.
pub fn register(spec: EntitySpec) -> Result<Catalog, CoreError> {
    register_at(spec, &home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user_spec() -> EntitySpec {
        EntitySpec {
            tag: EntityTag::from("user"),
            sources: vec![
                SourceSpec {
                    tag: SourceTag::from("upstream"),
                    adapter: AdapterSpec::Directory {
                        root: PathBuf::from("/srv/upstream/users"),
                    },
                },
                SourceSpec {
                    tag: SourceTag::from("local"),
                    adapter: AdapterSpec::Command {
                        get: vec!["usertool".into(), "get".into(), "${fk}".into()],
                        set: vec!["usertool".into(), "set".into(), "${fk}".into()],
                        delete: vec!["usertool".into(), "del".into(), "${fk}".into()],
                    },
                },
            ],
        }
    }

    #[test]
    fn catalog_roundtrip_preserves_source_order() {
        let home = TempDir::new().expect("home");
        register_at(user_spec(), home.path()).expect("register");

        let loaded = load_at(home.path()).expect("load");
        let entity = loaded.entity(&EntityTag::from("user")).expect("entity");
        let tags: Vec<String> = entity.source_tags().map(|t| t.0.clone()).collect();
        assert_eq!(tags, vec!["upstream", "local"]);
    }

    #[test]
    fn catalog_not_found_error() {
        let home = TempDir::new().expect("home");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, CoreError::CatalogNotFound { .. }));
        assert!(err.to_string().contains("catalog not found"));
    }

    #[test]
    fn resolve_rejects_unknown_entity() {
        let home = TempDir::new().expect("home");
        let catalog = register_at(user_spec(), home.path()).expect("register");

        let err = catalog
            .resolve(&EntityTag::from("invoice"), &SourceTag::from("local"))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntity { .. }));
    }

    #[test]
    fn resolve_rejects_unknown_source() {
        let home = TempDir::new().expect("home");
        let catalog = register_at(user_spec(), home.path()).expect("register");

        let err = catalog
            .resolve(&EntityTag::from("user"), &SourceTag::from("mirror"))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownSource { .. }));
    }

    #[test]
    fn reregistering_replaces_source_list() {
        let home = TempDir::new().expect("home");
        register_at(user_spec(), home.path()).expect("register");

        let trimmed = EntitySpec {
            tag: EntityTag::from("user"),
            sources: vec![SourceSpec {
                tag: SourceTag::from("local"),
                adapter: AdapterSpec::Directory {
                    root: PathBuf::from("/srv/local/users"),
                },
            }],
        };
        let catalog = register_at(trimmed, home.path()).expect("re-register");

        assert_eq!(catalog.entities.len(), 1);
        let entity = catalog.entity(&EntityTag::from("user")).expect("entity");
        assert_eq!(entity.sources.len(), 1);
        assert_eq!(entity.sources[0].tag, SourceTag::from("local"));
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = TempDir::new().expect("home");
        register_at(user_spec(), home.path()).expect("register");
        let tmp = catalog_path_at(home.path()).with_file_name("catalog.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be removed after successful save");
    }
}
