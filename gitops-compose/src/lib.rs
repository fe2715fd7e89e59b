//! # gitops-compose
//!
//! Runs the external deployment tool (`docker-compose` by default) against
//! the working copy: a best-effort `pull`, then `up -d` whose exit status is
//! the deployment outcome.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gitops_compose::ComposeExecutor;
//!
//! async fn deploy() {
//!     let executor = ComposeExecutor::new("docker-compose", "/srv/app");
//!     if let Err(err) = executor.run(true).await {
//!         eprintln!("deployment failed: {err}");
//!     }
//! }
//! ```

pub mod error;
pub mod executor;

pub use error::DeployError;
pub use executor::{ComposeExecutor, Deployer, BASE_UP_ARGS};
