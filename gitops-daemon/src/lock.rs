//! Single-slot run lock serializing reconciliation cycles.
//!
//! A trigger that finds the slot taken is dropped by the caller, never queued.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct RunLock {
    slot: Arc<Semaphore>,
}

/// Held for the whole duration of one cycle; releases the slot on drop.
#[derive(Debug)]
pub struct RunGuard {
    _permit: OwnedSemaphorePermit,
}

impl Default for RunLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLock {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the slot if free.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.slot
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| RunGuard { _permit: permit })
    }

    /// Wait until the running cycle (if any) finishes, then hold the slot.
    pub async fn acquire(&self) -> Option<RunGuard> {
        self.slot
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| RunGuard { _permit: permit })
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }
}
