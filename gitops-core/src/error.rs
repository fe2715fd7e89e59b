//! Error types for gitops-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` while expanding a `~/` path.
    #[error("cannot determine home directory to expand {path}")]
    HomeNotFound { path: PathBuf },
}
