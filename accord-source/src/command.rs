//! Subprocess adapter — get/set/delete shelled out to external commands.
//!
//! Each action is an argv template with `${fk}` holes, substituted without
//! any shell interpretation. `set` receives the document on stdin and must
//! print the definitive foreign-key id on stdout (updates may print nothing
//! and keep their key); `get` prints the document on stdout. Non-zero exit
//! maps to [`SourceError::Command`] with the captured stderr.

use std::io::Write;
use std::process::{Command, Stdio};

use accord_core::{Document, EntityTag, ForeignKey, SourceTag};

use crate::error::{io_err, SourceError};
use crate::DataSource;

const FK_HOLE: &str = "${fk}";

/// Adapter that drives an external command per action.
#[derive(Debug)]
pub struct CommandSource {
    entity: EntityTag,
    source: SourceTag,
    get: Vec<String>,
    set: Vec<String>,
    delete: Vec<String>,
}

impl CommandSource {
    pub fn new(
        entity: EntityTag,
        source: SourceTag,
        get: Vec<String>,
        set: Vec<String>,
        delete: Vec<String>,
    ) -> Result<Self, SourceError> {
        for (action, template) in [("get", &get), ("set", &set), ("delete", &delete)] {
            if template.is_empty() {
                return Err(SourceError::EmptyTemplate { action });
            }
        }
        Ok(Self {
            entity,
            source,
            get,
            set,
            delete,
        })
    }

    fn render(template: &[String], fk: Option<&str>) -> Vec<String> {
        let id = fk.unwrap_or("");
        template
            .iter()
            .map(|arg| arg.replace(FK_HOLE, id))
            .collect()
    }

    /// Run one rendered argv, optionally feeding stdin, capturing output.
    /// The child's handles are closed on every path by `wait_with_output`.
    fn run(argv: &[String], stdin: Option<&[u8]>) -> Result<std::process::Output, SourceError> {
        let program = &argv[0];
        let mut command = Command::new(program);
        command
            .args(&argv[1..])
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| io_err(program, e))?;
        if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(bytes).map_err(|e| io_err(program, e))?;
            // Dropping the pipe closes the child's stdin.
        }
        let output = child.wait_with_output().map_err(|e| io_err(program, e))?;

        if !output.status.success() {
            return Err(SourceError::Command {
                program: program.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(output)
    }
}

impl DataSource for CommandSource {
    fn entity(&self) -> &EntityTag {
        &self.entity
    }

    fn source(&self) -> &SourceTag {
        &self.source
    }

    fn get(&self, fk: &ForeignKey) -> Result<Document, SourceError> {
        let argv = Self::render(&self.get, Some(&fk.id));
        let output = Self::run(&argv, None)?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn set(&self, doc: &Document, fk: Option<&ForeignKey>) -> Result<ForeignKey, SourceError> {
        let argv = Self::render(&self.set, fk.map(|f| f.id.as_str()));
        let json = serde_json::to_vec(doc.as_value())?;
        let output = Self::run(&argv, Some(&json))?;

        let printed = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        let id = if !printed.is_empty() {
            printed
        } else if let Some(fk) = fk {
            fk.id.clone()
        } else {
            return Err(SourceError::MissingKey {
                program: argv[0].clone(),
            });
        };
        Ok(ForeignKey::new(
            self.entity.clone(),
            self.source.clone(),
            id,
        ))
    }

    fn delete(&self, fk: &ForeignKey) -> Result<(), SourceError> {
        let argv = Self::render(&self.delete, Some(&fk.id));
        Self::run(&argv, None)?;
        Ok(())
    }
}
