//! Domain types shared by the tracker, the executor and the daemon.
//!
//! A [`Reference`] is compared by commit hash only: two references naming
//! different branches but the same commit are the same deployable state.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Hex-encoded object id of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitHash(pub String);

impl CommitHash {
    /// First seven characters, the way git abbreviates hashes in log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(7);
        &self.0[..end]
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Reference
// ---------------------------------------------------------------------------

const SHORT_NAME_PREFIXES: [&str; 3] = ["refs/heads/", "refs/remotes/", "refs/tags/"];

/// Immutable pointer to a commit: a symbolic name plus the commit it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    /// Full reference name (`refs/heads/main`), or `HEAD` when detached.
    pub name: String,
    pub hash: CommitHash,
}

impl Reference {
    pub fn new(name: impl Into<String>, hash: impl Into<CommitHash>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }

    /// Name with the `refs/heads/`, `refs/remotes/` or `refs/tags/` prefix removed.
    pub fn short_name(&self) -> &str {
        SHORT_NAME_PREFIXES
            .iter()
            .find_map(|prefix| self.name.strip_prefix(prefix))
            .unwrap_or(&self.name)
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Reference {}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.short_name(), self.hash.short())
    }
}
