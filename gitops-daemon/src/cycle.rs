//! Serialized execution of reconciliation cycles and their bookkeeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::Instrument;

use gitops_compose::Deployer;
use gitops_sync::OpenRefStore;

use crate::error::ReconcileError;
use crate::lock::{RunGuard, RunLock};
use crate::reconcile::{CyclePhase, CycleReport, Reconciler};

/// What asked for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Schedule,
    Manual,
    Once,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Schedule => write!(f, "schedule"),
            TriggerSource::Manual => write!(f, "manual"),
            TriggerSource::Once => write!(f, "once"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Deployed,
    Recovered,
    /// Update failed; nothing was deployed.
    Aborted,
    /// Rollback failed; needs an operator.
    Fatal,
}

/// Summary of one finished cycle, as reported over the control socket.
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub seq: u64,
    pub source: TriggerSource,
    pub status: CycleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CycleRecord {
    fn new(
        seq: u64,
        source: TriggerSource,
        result: &Result<CycleReport, ReconcileError>,
        duration_ms: u64,
    ) -> Self {
        let mut record = Self {
            seq,
            source,
            status: CycleStatus::Deployed,
            head: None,
            updated: None,
            rejected: None,
            error: None,
            finished_at: Utc::now(),
            duration_ms,
        };
        match result {
            Ok(CycleReport::Deployed { head, updated }) => {
                record.head = Some(head.to_string());
                record.updated = Some(*updated);
            }
            Ok(CycleReport::Recovered {
                rejected,
                restored,
                cause,
            }) => {
                record.status = CycleStatus::Recovered;
                record.head = Some(restored.to_string());
                record.rejected = Some(rejected.to_string());
                record.error = Some(cause.clone());
            }
            Err(err) => {
                record.status = if err.is_fatal() {
                    CycleStatus::Fatal
                } else {
                    CycleStatus::Aborted
                };
                record.error = Some(err.to_string());
            }
        }
        record
    }
}

/// Counters exposed through `status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaemonStats {
    pub cycles_started: u64,
    pub ticks_skipped: u64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_cycle: Option<CycleRecord>,
}

/// A finished cycle: the bookkeeping record plus the typed result.
#[derive(Debug)]
pub struct CycleRun {
    pub record: CycleRecord,
    pub result: Result<CycleReport, ReconcileError>,
}

/// Owns the reconciler and the run lock; every trigger goes through here.
pub struct CycleRunner<O, D> {
    reconciler: Reconciler<O, D>,
    lock: RunLock,
    stats: RwLock<DaemonStats>,
    seq: AtomicU64,
}

impl<O, D> CycleRunner<O, D>
where
    O: OpenRefStore,
    D: Deployer,
{
    pub fn new(reconciler: Reconciler<O, D>) -> Self {
        Self {
            reconciler,
            lock: RunLock::new(),
            stats: RwLock::new(DaemonStats::default()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    pub fn phase(&self) -> CyclePhase {
        self.reconciler.phase()
    }

    /// Claim the run lock for `source`, or record a skipped trigger.
    pub async fn begin(&self, source: TriggerSource) -> Option<RunGuard> {
        match self.lock.try_acquire() {
            Some(guard) => Some(guard),
            None => {
                let skipped = {
                    let mut stats = self.stats.write().await;
                    stats.ticks_skipped += 1;
                    stats.ticks_skipped
                };
                tracing::warn!(
                    source = %source,
                    phase = %self.phase(),
                    ticks_skipped = skipped,
                    "previous cycle still running; trigger skipped",
                );
                None
            }
        }
    }

    /// Run one cycle while holding `guard`, then log and record the outcome.
    pub async fn run(&self, guard: RunGuard, source: TriggerSource) -> CycleRun {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.write().await.cycles_started += 1;

        let span = tracing::info_span!("cycle", seq, source = %source);
        let started = Instant::now();
        let result = async {
            tracing::debug!("cycle started");
            let result = self.reconciler.run_cycle().await;
            log_result(&result);
            result
        }
        .instrument(span)
        .await;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let record = CycleRecord::new(seq, source, &result, duration_ms);
        self.stats.write().await.last_cycle = Some(record.clone());
        drop(guard);
        CycleRun { record, result }
    }

    pub async fn set_next_run(&self, next: Option<DateTime<Utc>>) {
        self.stats.write().await.next_run_at = next;
    }

    pub async fn stats(&self) -> DaemonStats {
        self.stats.read().await.clone()
    }
}

fn log_result(result: &Result<CycleReport, ReconcileError>) {
    match result {
        Ok(CycleReport::Deployed {
            head,
            updated: true,
        }) => tracing::info!(head = %head, "new commit deployed"),
        Ok(CycleReport::Deployed {
            head,
            updated: false,
        }) => tracing::info!(head = %head, "deployment refreshed; no new commits"),
        Ok(CycleReport::Recovered {
            rejected,
            restored,
            cause,
        }) => tracing::warn!(
            rejected = %rejected,
            restored = %restored,
            cause = %cause,
            "deployment failed; previous commit recovered",
        ),
        Err(err) if err.is_fatal() => {
            tracing::error!(error = %err, "rollback failed; operator intervention required")
        }
        Err(err) => tracing::error!(error = %err, "cycle aborted"),
    }
}
