//! `gitops start` and `gitops once`.

use anyhow::{Context, Result};

use gitops_daemon::{run_once_blocking, start_blocking, CycleReport};

use super::config::ConfigArgs;

pub fn start(args: ConfigArgs) -> Result<()> {
    let config = args.load()?;
    start_blocking(config).context("daemon exited with error")
}

/// Prints the cycle report as JSON; a failed cycle exits non-zero.
pub fn once(args: ConfigArgs) -> Result<()> {
    let config = args.load()?;
    let report = run_once_blocking(&config).context("reconciliation cycle failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to render cycle report JSON")?
    );
    if let CycleReport::Recovered { rejected, .. } = &report {
        eprintln!("deployment of {rejected} failed; previous commit was restored");
    }
    Ok(())
}
