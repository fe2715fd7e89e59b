//! Deployment tool invocation.
//!
//! | Step | Command line                      | On failure          |
//! |------|-----------------------------------|---------------------|
//! | pull | `<tool> pull`                     | warning, continue   |
//! | up   | `<tool> up -d <extra args...>`    | [`DeployError`]     |
//!
//! Both steps run in the configured working directory with stdout/stderr
//! inherited from the daemon.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use gitops_core::DaemonConfig;

use crate::error::DeployError;

/// Arguments always passed to `up`, before any caller-supplied ones.
pub const BASE_UP_ARGS: &[&str] = &["-d"];

/// Anything able to bring the deployment up.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Run one deployment. `pull` refreshes images first, best-effort.
    async fn deploy(&self, pull: bool) -> Result<(), DeployError>;
}

/// Runs a docker-compose style tool against a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeExecutor {
    program: String,
    leading_args: Vec<String>,
    workdir: PathBuf,
    up_args: Vec<String>,
    timeout: Option<Duration>,
}

impl ComposeExecutor {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            workdir: workdir.into(),
            up_args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        let (program, leading_args) = config.compose_program();
        Self::new(program, config.deploy_dir())
            .with_leading_args(leading_args)
            .with_up_args(config.up_args.clone())
            .with_timeout(config.deploy_timeout())
    }

    /// Arguments placed before the subcommand (`compose` in `docker compose up`).
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Extra arguments appended after [`BASE_UP_ARGS`].
    pub fn with_up_args(mut self, args: Vec<String>) -> Self {
        self.up_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Full argument list of the `up` step.
    pub fn up_arguments(&self) -> Vec<String> {
        BASE_UP_ARGS
            .iter()
            .map(|arg| arg.to_string())
            .chain(self.up_args.iter().cloned())
            .collect()
    }

    /// Pull (best-effort when `pull` is set), then bring services up.
    ///
    /// The result reflects the `up` step only.
    pub async fn run(&self, pull: bool) -> Result<(), DeployError> {
        if pull {
            if let Err(err) = self.invoke("pull", &[]).await {
                tracing::warn!(error = %err, "image pull failed; continuing with local images");
            }
        }

        let result = self.invoke("up", &self.up_arguments()).await;
        if let Err(err) = &result {
            tracing::error!(error = %err, workdir = %self.workdir.display(), "bringing services up failed");
        }
        result
    }

    async fn invoke(&self, subcommand: &str, args: &[String]) -> Result<(), DeployError> {
        let command = self.describe(subcommand, args);
        tracing::debug!(command = %command, workdir = %self.workdir.display(), "running deployment tool");

        let launch_err = |source: std::io::Error| DeployError::Launch {
            command: command.clone(),
            workdir: self.workdir.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .arg(subcommand)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_err)?;

        let status = match self.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status.map_err(launch_err)?,
                    Err(_) => {
                        if let Err(err) = child.kill().await {
                            tracing::warn!(command = %command, error = %err, "failed to kill timed-out deployment tool");
                        }
                        return Err(DeployError::TimedOut {
                            command,
                            timeout: limit,
                        });
                    }
                }
            }
            None => child.wait().await.map_err(launch_err)?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::Failed {
                command,
                code: status.code(),
            })
        }
    }

    fn describe(&self, subcommand: &str, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.leading_args.iter().map(String::as_str))
            .chain(std::iter::once(subcommand))
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Deployer for ComposeExecutor {
    async fn deploy(&self, pull: bool) -> Result<(), DeployError> {
        self.run(pull).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_splits_command_and_joins_workdir() {
        let config = DaemonConfig {
            repository_path: PathBuf::from("/srv/app"),
            workdir: Some(PathBuf::from("stack")),
            compose_command: "docker compose".to_string(),
            up_args: vec!["--remove-orphans".to_string()],
            deploy_timeout_secs: Some(30),
            ..DaemonConfig::default()
        };

        let executor = ComposeExecutor::from_config(&config);
        assert_eq!(executor.workdir(), Path::new("/srv/app/stack"));
        assert_eq!(
            executor.describe("up", &executor.up_arguments()),
            "docker compose up -d --remove-orphans"
        );
        assert_eq!(executor.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn up_arguments_start_with_detach() {
        let executor = ComposeExecutor::new("docker-compose", "/srv")
            .with_up_args(vec!["web".to_string(), "worker".to_string()]);
        assert_eq!(executor.up_arguments(), vec!["-d", "web", "worker"]);
    }
}
