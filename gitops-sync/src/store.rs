//! Seam between the reconciliation engine and git.
//!
//! The daemon drives any [`RefStore`]; production uses [`RefTracker`] opened
//! fresh each cycle through [`TrackerSettings`].

use std::path::PathBuf;

use gitops_core::{types::Reference, DaemonConfig};

use crate::error::GitError;
use crate::tracker::{RefTracker, UpdateOutcome};

/// The two version-control transitions a reconciliation cycle needs.
pub trait RefStore: Send {
    /// Fetch and fast-forward the working copy (see [`RefTracker::update`]).
    fn update(&mut self) -> Result<UpdateOutcome, GitError>;

    /// Hard-reset to `target`, returning the head before the reset.
    fn apply(&mut self, target: &Reference) -> Result<Reference, GitError>;
}

/// Produces one [`RefStore`] session per cycle.
pub trait OpenRefStore: Send + Sync + 'static {
    type Store: RefStore + 'static;

    fn open(&self) -> Result<Self::Store, GitError>;
}

impl RefStore for RefTracker {
    fn update(&mut self) -> Result<UpdateOutcome, GitError> {
        RefTracker::update(self)
    }

    fn apply(&mut self, target: &Reference) -> Result<Reference, GitError> {
        RefTracker::apply(self, target)
    }
}

/// Where and how to open a [`RefTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    pub repository_path: PathBuf,
    pub remote: String,
    pub ssh_key_path: PathBuf,
}

impl TrackerSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            repository_path: config.repository_path.clone(),
            remote: config.remote.clone(),
            ssh_key_path: config.ssh_key_path.clone(),
        }
    }
}

impl OpenRefStore for TrackerSettings {
    type Store = RefTracker;

    fn open(&self) -> Result<RefTracker, GitError> {
        RefTracker::open(
            &self.repository_path,
            self.remote.clone(),
            self.ssh_key_path.clone(),
        )
    }
}
