//! Error types for gitops-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from version-control operations.
///
/// Every variant carries enough context (path, reference, remote) to be
/// diagnosed from a log line alone.
#[derive(Debug, Error)]
pub enum GitError {
    /// The configured path is not a git working copy.
    #[error("unable to open {path} as git repository: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// The local head or a remote-tracking ref could not be resolved to a commit.
    #[error("unable to resolve {reference}: {source}")]
    RefResolution {
        reference: String,
        #[source]
        source: git2::Error,
    },

    /// Transport or authentication failure while fetching.
    #[error("fetch from remote '{remote}' failed: {source}")]
    Fetch {
        remote: String,
        #[source]
        source: git2::Error,
    },

    /// The hard reset of the working tree failed.
    #[error("unable to reset {from} to {to}: {source}")]
    Apply {
        from: String,
        to: String,
        #[source]
        source: git2::Error,
    },
}

/// Convenience constructor for [`GitError::RefResolution`].
pub(crate) fn resolution_err(reference: impl Into<String>, source: git2::Error) -> GitError {
    GitError::RefResolution {
        reference: reference.into(),
        source,
    }
}
