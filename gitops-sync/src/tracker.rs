//! Local/remote head tracking over a git working copy.
//!
//! ## `update` protocol
//!
//! 1. Forced fetch of `+refs/heads/*:refs/remotes/<remote>/*`.
//! 2. No tracking ref moved → [`UpdateOutcome::Unchanged`] with the local head.
//! 3. Resolve `refs/remotes/<remote>/<local branch>`.
//! 4. Same commit as the local head → [`UpdateOutcome::Unchanged`].
//! 5. Hard reset the working tree and index to the remote commit.
//! 6. Return [`UpdateOutcome::Applied`] carrying the pre-reset head.
//!
//! Rollback is not a separate code path: it is [`RefTracker::apply`] with the
//! `previous` reference from step 6.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{FetchOptions, ObjectType, Oid, RemoteCallbacks, Repository, ResetType};

use gitops_core::types::Reference;

use crate::credentials;
use crate::error::{resolution_err, GitError};

// ---------------------------------------------------------------------------
// Update outcome
// ---------------------------------------------------------------------------

/// Result of [`RefTracker::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing new on the remote; the working copy was not touched.
    Unchanged { head: Reference },
    /// The working copy was reset from `previous` to `current`.
    Applied {
        previous: Reference,
        current: Reference,
    },
}

impl UpdateOutcome {
    /// Reference to restore if deploying [`Self::current`] fails.
    pub fn previous(&self) -> &Reference {
        match self {
            UpdateOutcome::Unchanged { head } => head,
            UpdateOutcome::Applied { previous, .. } => previous,
        }
    }

    /// Reference the working copy points at after the update.
    pub fn current(&self) -> &Reference {
        match self {
            UpdateOutcome::Unchanged { head } => head,
            UpdateOutcome::Applied { current, .. } => current,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied { .. })
    }
}

// ---------------------------------------------------------------------------
// RefTracker
// ---------------------------------------------------------------------------

/// Session over one opened repository, bound to a remote and a credential.
///
/// Owns the repository handle exclusively; never mutated after [`RefTracker::open`].
pub struct RefTracker {
    repo: Repository,
    path: PathBuf,
    remote: String,
    ssh_key_path: PathBuf,
}

impl std::fmt::Debug for RefTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefTracker")
            .field("path", &self.path)
            .field("remote", &self.remote)
            .field("ssh_key_path", &self.ssh_key_path)
            .finish()
    }
}

impl RefTracker {
    pub fn open(
        path: &Path,
        remote: impl Into<String>,
        ssh_key_path: impl Into<PathBuf>,
    ) -> Result<Self, GitError> {
        let repo = Repository::open(path).map_err(|source| GitError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
            remote: remote.into(),
            ssh_key_path: ssh_key_path.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Currently checked-out reference, resolved to its commit.
    ///
    /// Fails on an unborn branch (empty repository).
    pub fn local_ref(&self) -> Result<Reference, GitError> {
        let head = self.repo.head().map_err(|e| resolution_err("HEAD", e))?;
        let commit = head
            .peel_to_commit()
            .map_err(|e| resolution_err("HEAD", e))?;
        let name = head.name().unwrap_or("HEAD").to_string();
        Ok(Reference::new(name, commit.id().to_string()))
    }

    /// Remote-tracking ref for the local branch: `refs/remotes/<remote>/<branch>`.
    pub fn remote_ref(&self) -> Result<Reference, GitError> {
        let local = self.local_ref()?;
        let refname = format!("refs/remotes/{}/{}", self.remote, local.short_name());
        let reference = self
            .repo
            .find_reference(&refname)
            .and_then(|r| r.resolve())
            .map_err(|e| resolution_err(&refname, e))?;
        let commit = reference
            .peel_to_commit()
            .map_err(|e| resolution_err(&refname, e))?;
        Ok(Reference::new(refname, commit.id().to_string()))
    }

    /// Forced fetch of every branch of the remote.
    ///
    /// Returns `false` when no tracking ref moved; that is the normal
    /// "already up to date" case, not an error.
    pub fn fetch(&self) -> Result<bool, GitError> {
        let fetch_err = |source: git2::Error| GitError::Fetch {
            remote: self.remote.clone(),
            source,
        };

        let mut remote = self.repo.find_remote(&self.remote).map_err(fetch_err)?;
        let moved = Cell::new(0usize);

        {
            let mut callbacks = RemoteCallbacks::new();
            credentials::attach(&mut callbacks, credentials::load(&self.ssh_key_path));
            callbacks.update_tips(|refname, old, new| {
                tracing::debug!(reference = refname, old = %old, new = %new, "tracking ref moved");
                moved.set(moved.get() + 1);
                true
            });

            let mut options = FetchOptions::new();
            options.remote_callbacks(callbacks);

            let refspec = format!("+refs/heads/*:refs/remotes/{}/*", self.remote);
            remote
                .fetch(&[refspec.as_str()], Some(&mut options), None)
                .map_err(fetch_err)?;
        }

        let stats = remote.stats();
        tracing::debug!(
            remote = %self.remote,
            received_objects = stats.received_objects(),
            received_bytes = stats.received_bytes(),
            updated_refs = moved.get(),
            "fetch finished",
        );

        if moved.get() == 0 {
            tracing::debug!(remote = %self.remote, "no changes detected on remote");
            return Ok(false);
        }
        Ok(true)
    }

    /// Hard-reset the working tree and index to `target`, discarding local edits.
    ///
    /// Returns the head captured before the reset.
    pub fn apply(&self, target: &Reference) -> Result<Reference, GitError> {
        let current = self.local_ref()?;
        let apply_err = |source: git2::Error| GitError::Apply {
            from: current.to_string(),
            to: target.to_string(),
            source,
        };

        let oid = Oid::from_str(&target.hash.0).map_err(apply_err)?;
        let object = self
            .repo
            .find_object(oid, Some(ObjectType::Commit))
            .map_err(apply_err)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo
            .reset(&object, ResetType::Hard, Some(&mut checkout))
            .map_err(apply_err)?;

        tracing::info!(
            from = %current.short_name(),
            from_hash = %current.hash,
            to = %target.short_name(),
            to_hash = %target.hash,
            "working copy updated",
        );
        Ok(current)
    }

    /// Fetch, then apply the remote head if it differs from the local one.
    pub fn update(&self) -> Result<UpdateOutcome, GitError> {
        if !self.fetch()? {
            let head = self.local_ref()?;
            return Ok(UpdateOutcome::Unchanged { head });
        }

        let remote = self.remote_ref()?;
        let local = self.local_ref()?;
        if remote == local {
            tracing::debug!(head = %local, "remote moved but tracked branch is unchanged");
            return Ok(UpdateOutcome::Unchanged { head: local });
        }

        let previous = self.apply(&remote)?;
        Ok(UpdateOutcome::Applied {
            previous,
            current: remote,
        })
    }
}
