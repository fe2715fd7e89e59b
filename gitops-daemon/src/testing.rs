//! In-memory stand-ins for git and the deployment tool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use gitops_compose::{DeployError, Deployer};
use gitops_core::types::Reference;
use gitops_sync::{GitError, OpenRefStore, RefStore, UpdateOutcome};

pub(crate) fn c1() -> Reference {
    Reference::new("refs/heads/main", "c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1")
}

pub(crate) fn c2() -> Reference {
    Reference::new("refs/remotes/origin/main", "c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2c2")
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RepoState {
    head: Reference,
    remote: Reference,
    fail_open: bool,
    fail_fetch: bool,
    fail_apply_to: Option<Reference>,
    applied: Vec<Reference>,
}

/// Shared fake repository; every clone and every opened session see the same state.
#[derive(Debug, Clone)]
pub(crate) struct FakeRepo(Arc<Mutex<RepoState>>);

impl FakeRepo {
    pub(crate) fn new(head: Reference, remote: Reference) -> Self {
        Self(Arc::new(Mutex::new(RepoState {
            head,
            remote,
            fail_open: false,
            fail_fetch: false,
            fail_apply_to: None,
            applied: Vec::new(),
        })))
    }

    pub(crate) fn failing_open(self) -> Self {
        self.0.lock().unwrap().fail_open = true;
        self
    }

    pub(crate) fn failing_fetch(self) -> Self {
        self.0.lock().unwrap().fail_fetch = true;
        self
    }

    pub(crate) fn failing_apply_to(self, target: Reference) -> Self {
        self.0.lock().unwrap().fail_apply_to = Some(target);
        self
    }

    pub(crate) fn head(&self) -> Reference {
        self.0.lock().unwrap().head.clone()
    }

    /// Every reset target, in order.
    pub(crate) fn applied(&self) -> Vec<Reference> {
        self.0.lock().unwrap().applied.clone()
    }
}

impl OpenRefStore for FakeRepo {
    type Store = FakeRepo;

    fn open(&self) -> Result<FakeRepo, GitError> {
        if self.0.lock().unwrap().fail_open {
            return Err(GitError::Open {
                path: "/srv/app".into(),
                source: git2::Error::from_str("could not find repository"),
            });
        }
        Ok(self.clone())
    }
}

impl RefStore for FakeRepo {
    fn update(&mut self) -> Result<UpdateOutcome, GitError> {
        let fail_fetch = self.0.lock().unwrap().fail_fetch;
        if fail_fetch {
            return Err(GitError::Fetch {
                remote: "origin".to_string(),
                source: git2::Error::from_str("connection refused"),
            });
        }

        let (head, remote) = {
            let state = self.0.lock().unwrap();
            (state.head.clone(), state.remote.clone())
        };
        if head == remote {
            return Ok(UpdateOutcome::Unchanged { head });
        }
        let previous = self.apply(&remote)?;
        Ok(UpdateOutcome::Applied {
            previous,
            current: remote,
        })
    }

    fn apply(&mut self, target: &Reference) -> Result<Reference, GitError> {
        let mut state = self.0.lock().unwrap();
        if state.fail_apply_to.as_ref() == Some(target) {
            return Err(GitError::Apply {
                from: state.head.to_string(),
                to: target.to_string(),
                source: git2::Error::from_str("permission denied"),
            });
        }
        state.applied.push(target.clone());
        Ok(std::mem::replace(&mut state.head, target.clone()))
    }
}

// ---------------------------------------------------------------------------
// Deployer
// ---------------------------------------------------------------------------

/// Scripted result of one deployment call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeed,
    Fail,
    /// The tool hung and was killed at the deadline.
    Hang,
}

#[derive(Debug, Default)]
struct DeployState {
    script: VecDeque<Outcome>,
    calls: Vec<bool>,
}

/// Deployer returning scripted outcomes; unscripted calls succeed.
///
/// With a gate, each call first waits for a permit from [`FakeDeployer::release`].
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDeployer {
    state: Arc<Mutex<DeployState>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeDeployer {
    pub(crate) fn succeeding() -> Self {
        Self::default()
    }

    pub(crate) fn scripted(outcomes: Vec<bool>) -> Self {
        Self::with_outcomes(
            outcomes
                .into_iter()
                .map(|ok| if ok { Outcome::Succeed } else { Outcome::Fail })
                .collect(),
        )
    }

    pub(crate) fn with_outcomes(outcomes: Vec<Outcome>) -> Self {
        let deployer = Self::default();
        deployer.state.lock().unwrap().script = outcomes.into();
        deployer
    }

    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// `pull` flag of every call, in order.
    pub(crate) fn calls(&self) -> Vec<bool> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(&self, pull: bool) -> Result<(), DeployError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(pull);
            state.script.pop_front().unwrap_or(Outcome::Succeed)
        };
        match outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(DeployError::Failed {
                command: "docker-compose up -d".to_string(),
                code: Some(1),
            }),
            Outcome::Hang => Err(DeployError::TimedOut {
                command: "docker-compose up -d".to_string(),
                timeout: Duration::from_secs(30),
            }),
        }
    }
}
