//! Accord — keep duplicated records consistent across data sources.
//!
//! # Usage
//!
//! ```text
//! accord init <entity> --dir <tag>=<path> [--dir <tag>=<path>]...
//! accord notify <entity> <source> <key> [--daemon]
//! accord status [--json]
//! accord daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, init::InitArgs, notify::NotifyArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "accord",
    version,
    about = "Keep duplicated records consistent across data sources",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register an entity and its sources in the catalog.
    Init(InitArgs),

    /// Reconcile one change notification.
    Notify(NotifyArgs),

    /// Show pending conflict notifications.
    Status(StatusArgs),

    /// Manage the Accord background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Notify(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
