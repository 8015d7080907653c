//! Per-server operation locks
//!
//! Lifecycle operations for one server are mutually exclusive and queue in
//! arrival order; different servers proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock is currently held")]
    Busy,

    #[error("lock acquisition was cancelled")]
    Cancelled,
}

/// Map of one-permit semaphores keyed by server id.
pub struct ServerLocks {
    locks: DashMap<Uuid, Arc<Semaphore>>,
}

impl ServerLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: &Uuid) -> Arc<Semaphore> {
        self.locks
            .entry(*id)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Acquire the server's lock, queueing behind other operations.
    pub async fn acquire(&self, id: &Uuid) -> Result<LockGuard, LockError> {
        let semaphore = self.lock_for(id);
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| LockError::Cancelled)?;
        Ok(LockGuard { _permit: permit })
    }

    /// Acquire without waiting; fails when an operation is in flight.
    pub fn try_acquire(&self, id: &Uuid) -> Result<LockGuard, LockError> {
        let semaphore = self.lock_for(id);
        match semaphore.try_acquire_owned() {
            Ok(permit) => Ok(LockGuard { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(LockError::Busy),
            Err(TryAcquireError::Closed) => Err(LockError::Cancelled),
        }
    }

    /// Whether a lifecycle operation currently holds the server's lock.
    pub fn is_locked(&self, id: &Uuid) -> bool {
        self.locks
            .get(id)
            .is_some_and(|s| s.available_permits() == 0)
    }

    /// Drop a deleted server's lock entry.
    pub fn forget(&self, id: &Uuid) {
        self.locks.remove(id);
    }
}

impl Default for ServerLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that releases the lock when dropped
pub struct LockGuard {
    _permit: OwnedSemaphorePermit,
}
