//! `gitops status|trigger|stop`: talk to a running daemon over its socket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use gitops_daemon::paths::socket_path;
use gitops_daemon::{request_reconcile, request_status, request_stop, DaemonError};

#[derive(Args, Debug)]
pub struct SocketArgs {
    /// Control socket of the daemon (default `~/.gitops/daemon.sock`).
    #[arg(long, env = "GITOPS_SOCKET")]
    pub socket: Option<PathBuf>,
}

impl SocketArgs {
    fn resolve(self) -> Result<PathBuf> {
        match self.socket {
            Some(socket) => Ok(socket),
            None => {
                let home = dirs::home_dir().context("could not determine home directory")?;
                Ok(socket_path(&home))
            }
        }
    }
}

pub fn status(args: SocketArgs) -> Result<()> {
    let socket = args.resolve()?;
    let payload = match request_status(&socket) {
        Ok(status) => status,
        Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
            "running": false,
            "socket": socket.display().to_string(),
        }),
        Err(err) => return Err(err).context("failed to query daemon status"),
    };
    print_json(&payload)
}

pub fn trigger(args: SocketArgs) -> Result<()> {
    let socket = args.resolve()?;
    let record = request_reconcile(&socket).context("failed to trigger reconciliation")?;
    print_json(&record)
}

pub fn stop(args: SocketArgs) -> Result<()> {
    let socket = args.resolve()?;
    match request_stop(&socket) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
