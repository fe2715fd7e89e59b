//! # gitops-sync
//!
//! Version-control side of reconciliation: resolve the local and
//! remote-tracking heads, fetch, and hard-reset the working copy.
//!
//! Open a [`RefTracker`] on a working copy and call [`RefTracker::update`]
//! to bring it to the remote head; keep the returned
//! [`UpdateOutcome::previous`] to roll back with [`RefTracker::apply`].

pub mod credentials;
pub mod error;
pub mod store;
pub mod tracker;

pub use error::GitError;
pub use store::{OpenRefStore, RefStore, TrackerSettings};
pub use tracker::{RefTracker, UpdateOutcome};
