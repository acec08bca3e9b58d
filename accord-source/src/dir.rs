//! Directory adapter — one `<root>/<fk>.json` file per record.
//!
//! Writes use a `.tmp` sibling plus rename so a crashed write never leaves
//! a half-written document behind. Creation allocates the next unused
//! numeric id by scanning the directory.

use std::io::ErrorKind;
use std::path::PathBuf;

use accord_core::{Document, EntityTag, ForeignKey, SourceTag};

use crate::error::{io_err, SourceError};
use crate::DataSource;

/// File-per-record adapter rooted at a directory.
#[derive(Debug)]
pub struct DirSource {
    entity: EntityTag,
    source: SourceTag,
    root: PathBuf,
}

impl DirSource {
    /// Open the adapter, creating `root` if needed.
    pub fn open(
        entity: EntityTag,
        source: SourceTag,
        root: PathBuf,
    ) -> Result<Self, SourceError> {
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        Ok(Self {
            entity,
            source,
            root,
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, SourceError> {
        // Ids become file names; anything that could escape the root is out.
        if id.is_empty()
            || id == "."
            || id == ".."
            || id.contains('/')
            || id.contains('\\')
        {
            return Err(SourceError::InvalidKey { id: id.to_owned() });
        }
        Ok(self.root.join(format!("{id}.json")))
    }

    /// Next unused numeric id, by directory scan.
    fn allocate_id(&self) -> Result<String, SourceError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| io_err(&self.root, e))?;
        let mut max = 0i64;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            let name = entry.file_name();
            let Some(stem) = name.to_string_lossy().strip_suffix(".json").map(str::to_owned)
            else {
                continue;
            };
            if let Ok(n) = stem.parse::<i64>() {
                max = max.max(n);
            }
        }
        Ok((max + 1).to_string())
    }
}

impl DataSource for DirSource {
    fn entity(&self) -> &EntityTag {
        &self.entity
    }

    fn source(&self) -> &SourceTag {
        &self.source
    }

    fn get(&self, fk: &ForeignKey) -> Result<Document, SourceError> {
        let path = self.record_path(&fk.id)?;
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound { fk: fk.clone() })
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    fn set(&self, doc: &Document, fk: Option<&ForeignKey>) -> Result<ForeignKey, SourceError> {
        let id = match fk {
            Some(fk) => fk.id.clone(),
            None => self.allocate_id()?,
        };
        let path = self.record_path(&id)?;
        let json = serde_json::to_string_pretty(doc.as_value())?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(err) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, err));
        }

        tracing::debug!("wrote {}", path.display());
        Ok(ForeignKey::new(
            self.entity.clone(),
            self.source.clone(),
            id,
        ))
    }

    fn delete(&self, fk: &ForeignKey) -> Result<(), SourceError> {
        let path = self.record_path(&fk.id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn source(root: &TempDir) -> DirSource {
        DirSource::open(
            EntityTag::from("user"),
            SourceTag::from("local"),
            root.path().to_path_buf(),
        )
        .expect("open")
    }

    #[test]
    fn set_then_get_roundtrip() {
        let root = TempDir::new().expect("root");
        let adapter = source(&root);

        let doc = Document::new(json!({"name": "Hubert"}));
        let fk = adapter.set(&doc, None).expect("set");
        assert_eq!(adapter.get(&fk).expect("get"), doc);
    }

    #[test]
    fn create_allocates_increasing_numeric_ids() {
        let root = TempDir::new().expect("root");
        let adapter = source(&root);
        let doc = Document::new(json!({}));

        let first = adapter.set(&doc, None).expect("first");
        let second = adapter.set(&doc, None).expect("second");
        assert_eq!(first.id, "1");
        assert_eq!(second.id, "2");
    }

    #[test]
    fn set_with_fk_updates_in_place() {
        let root = TempDir::new().expect("root");
        let adapter = source(&root);

        let fk = adapter
            .set(&Document::new(json!({"v": 1})), None)
            .expect("create");
        let updated = adapter
            .set(&Document::new(json!({"v": 2})), Some(&fk))
            .expect("update");
        assert_eq!(updated, fk, "update returns the same key");
        assert_eq!(
            adapter.get(&fk).expect("get").as_value(),
            &json!({"v": 2})
        );
    }

    #[test]
    fn get_of_missing_record_is_not_found() {
        let root = TempDir::new().expect("root");
        let adapter = source(&root);
        let fk = ForeignKey::new("user", "local", "999");
        let err = adapter.get(&fk).unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[test]
    fn get_of_malformed_json_is_a_decode_error() {
        let root = TempDir::new().expect("root");
        let adapter = source(&root);
        std::fs::write(root.path().join("7.json"), "{not json").expect("write");

        let err = adapter
            .get(&ForeignKey::new("user", "local", "7"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn delete_of_absent_record_succeeds() {
        let root = TempDir::new().expect("root");
        let adapter = source(&root);
        let fk = ForeignKey::new("user", "local", "1");
        adapter.delete(&fk).expect("absent delete is fine");

        adapter
            .set(&Document::new(json!({})), Some(&fk))
            .expect("set");
        adapter.delete(&fk).expect("delete");
        adapter.delete(&fk).expect("redelete");
        assert!(matches!(
            adapter.get(&fk).unwrap_err(),
            SourceError::NotFound { .. }
        ));
    }

    #[test]
    fn path_escaping_ids_are_rejected() {
        let root = TempDir::new().expect("root");
        let adapter = source(&root);
        for id in ["", ".", "..", "a/b", "a\\b"] {
            let fk = ForeignKey::new("user", "local", id);
            assert!(
                matches!(adapter.get(&fk).unwrap_err(), SourceError::InvalidKey { .. }),
                "id {id:?} must be rejected"
            );
        }
    }

    #[test]
    fn tmp_file_cleaned_up_after_set() {
        let root = TempDir::new().expect("root");
        let adapter = source(&root);
        let fk = adapter
            .set(&Document::new(json!({"a": 1})), None)
            .expect("set");
        let tmp = root.path().join(format!("{}.json.tmp", fk.id));
        assert!(!tmp.exists(), ".tmp must be removed after atomic rename");
    }
}
