use std::path::{Path, PathBuf};

use gitops_core::{ConfigError, DaemonConfig};

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// Socket environment override, mirrored by the CLI's `--socket`.
pub const SOCKET_ENV: &str = "GITOPS_SOCKET";

pub fn gitops_root(home: &Path) -> PathBuf {
    home.join(".gitops")
}

pub fn socket_path(home: &Path) -> PathBuf {
    gitops_root(home).join(DAEMON_SOCKET)
}

/// The configured socket, or `~/.gitops/daemon.sock`.
pub fn resolve_socket(config: &DaemonConfig) -> Result<PathBuf, ConfigError> {
    match &config.socket_path {
        Some(path) => Ok(path.clone()),
        None => {
            let home = dirs::home_dir().ok_or_else(|| ConfigError::HomeNotFound {
                path: PathBuf::from("~/.gitops"),
            })?;
            Ok(socket_path(&home))
        }
    }
}
