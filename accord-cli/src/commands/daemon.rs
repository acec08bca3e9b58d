//! `accord daemon` — run and control the background daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use accord_daemon::{protocol, runtime};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground.
    Start,
    /// Stop a running daemon.
    Stop,
    /// Query a running daemon.
    Status,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    match command {
        DaemonCommand::Start => {
            runtime::start_blocking(&home)?;
            Ok(())
        }
        DaemonCommand::Stop => {
            protocol::request_stop(&home)?;
            println!("✓ daemon stopped");
            Ok(())
        }
        DaemonCommand::Status => {
            let status = protocol::request_status(&home)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}
