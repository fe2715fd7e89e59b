//! Daemon configuration.
//!
//! # Sources
//!
//! ```text
//! defaults  <  YAML file (--config / GITOPS_CONFIG)  <  environment / flags
//! ```
//!
//! The file layer is handled here; the CLI applies environment and flag
//! overrides on top of the loaded value. The resulting [`DaemonConfig`] is
//! built once at startup and handed to the runtime by value.
//!
//! # API pattern
//!
//! Functions touching `~` take an explicit `home` (`_at` suffix) so tests can
//! point them at a `TempDir`; the no-arg forms derive it from `dirs::home_dir()`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SCHEDULE: &str = "* * * * *";
pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_REPOSITORY_PATH: &str = "/tmp";
pub const DEFAULT_SSH_KEY_PATH: &str = "~/.ssh/id_rsa";
pub const DEFAULT_COMPOSE_COMMAND: &str = "docker-compose";

// ---------------------------------------------------------------------------
// Log format
// ---------------------------------------------------------------------------

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format '{other}'; expected: text, json"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// DaemonConfig
// ---------------------------------------------------------------------------

/// Everything the daemon needs to run, constructed once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Cron expression (5 or 6 fields) deciding when a cycle fires.
    pub schedule: String,
    /// Name of the git remote whose tracking branch is deployed.
    pub remote: String,
    /// Working copy the deployment runs against.
    pub repository_path: PathBuf,
    /// SSH private key used for fetching; `~/` is expanded.
    pub ssh_key_path: PathBuf,
    /// Subdirectory of the working copy holding the compose file.
    pub workdir: Option<PathBuf>,
    /// Deployment tool; multiple words are split on whitespace.
    pub compose_command: String,
    /// Arguments appended to `up -d`.
    pub up_args: Vec<String>,
    /// Upper bound on a single deployment tool invocation.
    pub deploy_timeout_secs: Option<u64>,
    pub log_format: LogFormat,
    /// Control socket; defaults to `~/.gitops/daemon.sock`.
    pub socket_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE.to_string(),
            remote: DEFAULT_REMOTE.to_string(),
            repository_path: PathBuf::from(DEFAULT_REPOSITORY_PATH),
            ssh_key_path: PathBuf::from(DEFAULT_SSH_KEY_PATH),
            workdir: None,
            compose_command: DEFAULT_COMPOSE_COMMAND.to_string(),
            up_args: Vec::new(),
            deploy_timeout_secs: None,
            log_format: LogFormat::default(),
            socket_path: None,
        }
    }
}

impl DaemonConfig {
    /// Directory the deployment tool is started in.
    pub fn deploy_dir(&self) -> PathBuf {
        match &self.workdir {
            Some(sub) => self.repository_path.join(sub),
            None => self.repository_path.clone(),
        }
    }

    pub fn deploy_timeout(&self) -> Option<Duration> {
        self.deploy_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Program and leading arguments of the deployment tool.
    ///
    /// Falls back to [`DEFAULT_COMPOSE_COMMAND`] when the configured value is blank.
    pub fn compose_program(&self) -> (String, Vec<String>) {
        let mut words = self.compose_command.split_whitespace().map(str::to_owned);
        match words.next() {
            Some(program) => (program, words.collect()),
            None => (DEFAULT_COMPOSE_COMMAND.to_string(), Vec::new()),
        }
    }

    /// Expand `~/` in every path field against `home`.
    pub fn resolve_paths_at(mut self, home: &Path) -> Self {
        self.repository_path = expand_home_at(&self.repository_path, home);
        self.ssh_key_path = expand_home_at(&self.ssh_key_path, home);
        self.socket_path = self.socket_path.map(|p| expand_home_at(&p, home));
        self
    }

    /// `resolve_paths_at` using the current user's home directory.
    pub fn resolve_paths(self) -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or_else(|| ConfigError::HomeNotFound {
            path: self.ssh_key_path.clone(),
        })?;
        Ok(self.resolve_paths_at(&home))
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a config file. Missing keys take their defaults; unknown keys are rejected.
pub fn load_at(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&raw, path)
}

fn parse(raw: &str, path: &Path) -> Result<DaemonConfig, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(DaemonConfig::default());
    }
    serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace a leading `~` component with `home`. Other paths are returned unchanged.
pub fn expand_home_at(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
