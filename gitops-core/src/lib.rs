//! gitops core library: domain types, daemon configuration, errors.
//!
//! - [`types`]: [`Reference`] and [`CommitHash`]
//! - [`config`]: [`DaemonConfig`] and file loading
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{DaemonConfig, LogFormat};
pub use error::ConfigError;
pub use types::{CommitHash, Reference};
