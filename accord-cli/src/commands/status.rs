//! `accord status` — list pending conflict notifications.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use accord_daemon::paths;
use accord_store::{SqliteStore, Store};

/// Arguments for `accord status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit raw JSON instead of the human summary.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let store_path = paths::store_path(&home);
        if !store_path.exists() {
            if self.json {
                println!("[]");
            } else {
                println!("✓ no pending conflicts (nothing reconciled yet)");
            }
            return Ok(());
        }

        let store = SqliteStore::open(&store_path)?;
        let notifications = store.notifications()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&notifications)?);
            return Ok(());
        }

        if notifications.is_empty() {
            println!("✓ no pending conflicts");
            return Ok(());
        }
        println!(
            "{} {} record(s) with unresolved conflicts:",
            "!".yellow(),
            notifications.len()
        );
        for notification in &notifications {
            println!(
                "  {} — diff {} at {}",
                notification.key,
                notification.diff_id,
                notification.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Ok(())
    }
}
