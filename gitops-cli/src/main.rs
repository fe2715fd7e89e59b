//! gitops: keep a docker-compose deployment in step with a git remote.
//!
//! # Usage
//!
//! ```text
//! gitops start [options] [-- <up args>...]   run the scheduled daemon in the foreground
//! gitops once  [options] [-- <up args>...]   run a single reconciliation cycle
//! gitops status [--socket <path>]            query a running daemon
//! gitops trigger [--socket <path>]           run a cycle now in a running daemon
//! gitops stop [--socket <path>]              ask a running daemon to shut down
//! ```
//!
//! Every option can also be set through its environment variable
//! (`CRON`, `REMOTE`, `REPOSITORY_PATH`, `SSH_PRIV_KEY_FILE`, ...).

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigArgs, control::SocketArgs};

#[derive(Parser, Debug)]
#[command(
    name = "gitops",
    version,
    about = "Deploy a docker-compose stack from git on a schedule, rolling back failed commits",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon in the foreground (scheduler + control socket).
    Start(ConfigArgs),

    /// Run one reconciliation cycle and exit.
    Once(ConfigArgs),

    /// Show the status of a running daemon.
    Status(SocketArgs),

    /// Run a reconciliation cycle now in a running daemon.
    Trigger(SocketArgs),

    /// Request graceful daemon shutdown.
    Stop(SocketArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start(args) => commands::run::start(args),
        Commands::Once(args) => commands::run::once(args),
        Commands::Status(args) => commands::control::status(args),
        Commands::Trigger(args) => commands::control::trigger(args),
        Commands::Stop(args) => commands::control::stop(args),
    }
}
