//! `accord init` — register an entity and its sources in the catalog.
//!
//! Only directory sources can be declared from the command line; command
//! (subprocess) sources are added by editing `~/.accord/catalog.yaml`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use accord_core::catalog::{self, AdapterSpec, EntitySpec, SourceSpec};
use accord_core::{EntityTag, SourceTag};

/// Arguments for `accord init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Entity tag to register (e.g. `user`).
    pub entity: String,

    /// Directory source as `<tag>=<path>`. Repeatable; declaration order is
    /// the reconciliation fan-out order.
    #[arg(long = "dir", value_name = "TAG=PATH")]
    pub dirs: Vec<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        if self.dirs.is_empty() {
            bail!("declare at least one source with --dir <tag>=<path>");
        }

        let sources = self
            .dirs
            .iter()
            .map(|raw| parse_dir_source(raw))
            .collect::<Result<Vec<_>>>()?;
        let spec = EntitySpec {
            tag: EntityTag::from(self.entity.as_str()),
            sources,
        };

        catalog::register(spec)
            .with_context(|| format!("failed to register entity '{}'", self.entity))?;
        println!(
            "✓ registered entity '{}' with {} source(s)",
            self.entity,
            self.dirs.len()
        );
        Ok(())
    }
}

fn parse_dir_source(raw: &str) -> Result<SourceSpec> {
    let Some((tag, path)) = raw.split_once('=') else {
        bail!("--dir takes <tag>=<path>, got '{raw}'");
    };
    if tag.is_empty() || path.is_empty() {
        bail!("--dir takes <tag>=<path>, got '{raw}'");
    }
    Ok(SourceSpec {
        tag: SourceTag::from(tag),
        adapter: AdapterSpec::Directory {
            root: PathBuf::from(path),
        },
    })
}
