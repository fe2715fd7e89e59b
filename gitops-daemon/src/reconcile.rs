//! The reconciliation state machine.
//!
//! ```text
//! Idle -> Updating -> Deploying -> Done
//!                         |
//!                         v
//!                    RollingBack -> Done (recovered)
//!                         |
//!                         v
//!                       Fatal
//! ```
//!
//! Every cycle deploys, even when git is unchanged, so drift in the running
//! environment is corrected on each tick. Git work runs on the blocking pool;
//! the steps of one cycle never overlap.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use gitops_compose::Deployer;
use gitops_core::types::Reference;
use gitops_sync::{GitError, OpenRefStore, RefStore, UpdateOutcome};

use crate::error::ReconcileError;

/// Where a running cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Updating,
    Deploying,
    RollingBack,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Idle => write!(f, "idle"),
            CyclePhase::Updating => write!(f, "updating"),
            CyclePhase::Deploying => write!(f, "deploying"),
            CyclePhase::RollingBack => write!(f, "rolling_back"),
        }
    }
}

/// Successful end states of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleReport {
    /// `head` is deployed; `updated` tells whether it is a new commit.
    Deployed { head: Reference, updated: bool },
    /// Deploying `rejected` failed; `restored` is checked out and running again.
    Recovered {
        rejected: Reference,
        restored: Reference,
        cause: String,
    },
}

impl CycleReport {
    /// Reference the working copy points at after the cycle.
    pub fn head(&self) -> &Reference {
        match self {
            CycleReport::Deployed { head, .. } => head,
            CycleReport::Recovered { restored, .. } => restored,
        }
    }
}

/// Sequences git transitions and deployments for one repository.
pub struct Reconciler<O, D> {
    store: Arc<O>,
    deployer: D,
    phase: watch::Sender<CyclePhase>,
}

impl<O, D> Reconciler<O, D>
where
    O: OpenRefStore,
    D: Deployer,
{
    pub fn new(store: O, deployer: D) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            store: Arc::new(store),
            deployer,
            phase,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    /// Run one full cycle: update, deploy, and roll back on deployment failure.
    pub async fn run_cycle(&self) -> Result<CycleReport, ReconcileError> {
        let result = self.drive().await;
        self.enter(CyclePhase::Idle);
        result
    }

    async fn drive(&self) -> Result<CycleReport, ReconcileError> {
        self.enter(CyclePhase::Updating);
        let store = Arc::clone(&self.store);
        let (session, outcome) = blocking(
            move || -> Result<(O::Store, UpdateOutcome), GitError> {
                let mut session = store.open()?;
                let outcome = session.update()?;
                Ok((session, outcome))
            },
        )
        .await?
        .map_err(ReconcileError::Update)?;

        match &outcome {
            UpdateOutcome::Applied { previous, current } => {
                tracing::info!(from = %previous, to = %current, "new commit checked out");
            }
            UpdateOutcome::Unchanged { head } => {
                tracing::debug!(head = %head, "no new commits; re-deploying current head");
            }
        }

        self.enter(CyclePhase::Deploying);
        let cause = match self.deployer.deploy(true).await {
            Ok(()) => {
                return Ok(CycleReport::Deployed {
                    head: outcome.current().clone(),
                    updated: outcome.is_applied(),
                })
            }
            Err(err) => err,
        };

        let rejected = outcome.current().clone();
        let target = outcome.previous().clone();
        self.enter(CyclePhase::RollingBack);
        tracing::warn!(
            rejected = %rejected,
            target = %target,
            error = %cause,
            "deployment failed; recovering previous commit",
        );

        let restore = target.clone();
        let applied = blocking(move || {
            let mut session = session;
            session.apply(&restore)
        })
        .await?;
        if let Err(source) = applied {
            return Err(ReconcileError::RollbackApply {
                rejected,
                target,
                cause,
                source,
            });
        }

        match self.deployer.deploy(false).await {
            Ok(()) => Ok(CycleReport::Recovered {
                rejected,
                restored: target,
                cause: cause.to_string(),
            }),
            Err(source) => Err(ReconcileError::RollbackDeploy {
                rejected,
                restored: target,
                cause,
                source,
            }),
        }
    }

    fn enter(&self, phase: CyclePhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = %previous, to = %phase, "cycle phase");
        }
    }
}

async fn blocking<T, F>(work: F) -> Result<T, ReconcileError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ReconcileError::Join(err.to_string()))
}
