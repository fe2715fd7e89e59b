use std::path::PathBuf;

use thiserror::Error;

use gitops_compose::DeployError;
use gitops_core::types::Reference;
use gitops_sync::GitError;

/// Error surface for the daemon runtime, scheduler and control protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid schedule '{expression}': {source}")]
    Schedule {
        expression: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("schedule '{expression}' has no upcoming fire time")]
    ScheduleExhausted { expression: String },

    #[error("config error: {0}")]
    Config(#[from] gitops_core::ConfigError),

    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("another gitops daemon is already listening on {socket}")]
    AlreadyRunning { socket: PathBuf },

    #[error("internal channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{task} task stopped abnormally: {reason}")]
    TaskFailed { task: &'static str, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

/// Failure classes of one reconciliation cycle.
///
/// [`ReconcileError::Update`] is a safe no-op: nothing was deployed and the
/// working copy is where it was. The two rollback variants are fatal for
/// the cycle and need an operator.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("update aborted, nothing deployed: {0}")]
    Update(#[source] GitError),

    #[error(
        "deployment of {rejected} failed ({cause}) and restoring {target} failed: {source}; \
         working copy state is indeterminate"
    )]
    RollbackApply {
        rejected: Reference,
        target: Reference,
        cause: DeployError,
        #[source]
        source: GitError,
    },

    #[error(
        "deployment of {rejected} failed ({cause}); {restored} was restored but bringing it up failed: {source}"
    )]
    RollbackDeploy {
        rejected: Reference,
        restored: Reference,
        cause: DeployError,
        #[source]
        source: DeployError,
    },

    #[error("reconciliation task failed: {0}")]
    Join(String),
}

impl ReconcileError {
    /// Both the forward deployment and its recovery failed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::RollbackApply { .. } | ReconcileError::RollbackDeploy { .. }
        )
    }
}
