//! Configuration flags shared by `gitops start` and `gitops once`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use gitops_core::{config, DaemonConfig, LogFormat};

/// Flags override the config file; each flag also reads its environment variable.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// YAML config file; flags and environment take precedence over it.
    #[arg(long, env = "GITOPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cron expression (5 fields, or 6 with seconds).
    #[arg(long, env = "CRON")]
    pub schedule: Option<String>,

    /// Git remote to fetch from.
    #[arg(long, env = "REMOTE")]
    pub remote: Option<String>,

    /// Working copy to keep in step with the remote.
    #[arg(long, env = "REPOSITORY_PATH")]
    pub repository_path: Option<PathBuf>,

    /// SSH private key used for fetching.
    #[arg(long = "ssh-key", env = "SSH_PRIV_KEY_FILE")]
    pub ssh_key_path: Option<PathBuf>,

    /// Directory inside the repository to run the deployment tool in.
    #[arg(long, env = "WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Deployment tool, e.g. `docker-compose` or `docker compose`.
    #[arg(long, env = "COMPOSE_COMMAND")]
    pub compose_command: Option<String>,

    /// Seconds before a deployment step is killed (0 disables).
    #[arg(long = "deploy-timeout", env = "DEPLOY_TIMEOUT")]
    pub deploy_timeout_secs: Option<u64>,

    /// Log output: text or json.
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Control socket path.
    #[arg(long = "socket", env = "GITOPS_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Extra arguments for `up`, after `--`.
    #[arg(last = true)]
    pub up_args: Vec<String>,
}

impl ConfigArgs {
    /// Defaults, then the config file, then flags/environment; `~` expanded last.
    pub fn load(self) -> Result<DaemonConfig> {
        let base = match &self.config {
            Some(path) => config::load_at(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => DaemonConfig::default(),
        };
        self.apply(base)
            .resolve_paths()
            .context("failed to resolve configured paths")
    }

    fn apply(self, mut config: DaemonConfig) -> DaemonConfig {
        if let Some(schedule) = self.schedule {
            config.schedule = schedule;
        }
        if let Some(remote) = self.remote {
            config.remote = remote;
        }
        if let Some(path) = self.repository_path {
            config.repository_path = path;
        }
        if let Some(path) = self.ssh_key_path {
            config.ssh_key_path = path;
        }
        if self.workdir.is_some() {
            config.workdir = self.workdir;
        }
        if let Some(command) = self.compose_command {
            config.compose_command = command;
        }
        if self.deploy_timeout_secs.is_some() {
            config.deploy_timeout_secs = self.deploy_timeout_secs;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if self.socket_path.is_some() {
            config.socket_path = self.socket_path;
        }
        if !self.up_args.is_empty() {
            config.up_args = self.up_args;
        }
        config
    }
}
