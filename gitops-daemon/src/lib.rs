//! gitops daemon: scheduled reconciliation with rollback, plus a Unix-socket
//! control surface (`status`, `reconcile`, `stop`).

pub mod cycle;
mod error;
pub mod lock;
pub mod paths;
pub mod protocol;
pub mod reconcile;
mod runtime;
pub mod schedule;
#[cfg(test)]
mod testing;

pub use cycle::{CycleRecord, CycleRunner, CycleStatus, DaemonStats, TriggerSource};
pub use error::{DaemonError, ReconcileError};
pub use lock::{RunGuard, RunLock};
pub use protocol::{
    request_reconcile, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use reconcile::{CyclePhase, CycleReport, Reconciler};
pub use runtime::{init_tracing, run, run_once, run_once_blocking, start_blocking, DaemonInfo};
pub use schedule::CycleSchedule;
