//! `accord notify` — reconcile one change notification.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use accord_core::catalog;
use accord_daemon::{paths, protocol};
use accord_engine::{ChangeNotice, DispatchOutcome, Dispatcher, Outcome, SourceFailure};
use accord_store::{SqliteStore, Store};

/// Arguments for `accord notify`.
#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Entity tag of the changed record.
    pub entity: String,
    /// Source the change was observed at.
    pub source: String,
    /// The source's key for the record.
    pub key: String,

    /// Send to the running daemon instead of reconciling in-process.
    #[arg(long)]
    pub daemon: bool,
}

impl NotifyArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        if self.daemon {
            let summary =
                protocol::request_notify(&home, &self.entity, &self.source, &self.key)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }

        let catalog = catalog::load_at(&home)
            .context("no catalog; register an entity with `accord init` first")?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&paths::store_path(&home))?);
        let dispatcher = Dispatcher::new(&catalog, store)?;

        let outcome = dispatcher.dispatch(&ChangeNotice {
            entity: self.entity,
            source: self.source,
            key: self.key,
        })?;
        print_outcome(&outcome);
        Ok(())
    }
}

fn print_outcome(outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Ignored { reason } => {
            println!("· ignored: {reason}");
        }
        DispatchOutcome::Handled(outcome) => match outcome {
            Outcome::Created { key, failures } => {
                println!("{} created {key}", "✓".green());
                print_failures(failures);
            }
            Outcome::Updated {
                key,
                conflicts,
                failures,
                ..
            } => {
                if *conflicts > 0 {
                    println!(
                        "{} updated {key} — {} conflicting fragment(s) recorded",
                        "!".yellow(),
                        conflicts
                    );
                } else {
                    println!("{} updated {key}", "✓".green());
                }
                print_failures(failures);
            }
            Outcome::Deleted { key, failures, .. } => {
                println!("{} deleted {key}", "✓".green());
                print_failures(failures);
            }
            Outcome::Problem { fk, reason } => {
                println!("{} problem with {fk}: {reason}", "!".red());
            }
        },
    }
}

fn print_failures(failures: &[SourceFailure]) {
    for failure in failures {
        println!(
            "  {} source '{}' failed: {}",
            "✗".red(),
            failure.source,
            failure.error
        );
    }
}
