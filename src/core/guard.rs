// Scoped ownership of a write permit and the shared mutex.
// Dropping an uncommitted permit returns it; dropping a held mutex releases it.
use tracing::{error, warn};

use crate::core::error::Error;
use crate::core::sync::{NamedSemaphore, SyncBackend};

pub struct PermitGuard<'a, B: SyncBackend> {
    permits: &'a NamedSemaphore<B>,
    pending: bool,
}

impl<'a, B: SyncBackend> PermitGuard<'a, B> {
    /// Wraps a permit the caller has already taken from `permits`.
    pub fn new(permits: &'a NamedSemaphore<B>) -> Self {
        Self {
            permits,
            pending: true,
        }
    }

    pub fn commit(mut self) {
        self.pending = false;
    }
}

impl<B: SyncBackend> Drop for PermitGuard<'_, B> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        match self.permits.post() {
            Ok(()) => warn!(object = self.permits.name(), "returned uncommitted write permit"),
            Err(err) => error!(object = self.permits.name(), %err, "failed to return write permit"),
        }
    }
}

pub struct MutexGuard<'a, B: SyncBackend> {
    mutex: &'a NamedSemaphore<B>,
    held: bool,
}

impl<'a, B: SyncBackend> MutexGuard<'a, B> {
    /// Wraps a mutex the caller has already acquired.
    pub fn new(mutex: &'a NamedSemaphore<B>) -> Self {
        Self { mutex, held: true }
    }

    pub fn unlock(mut self) -> Result<(), Error> {
        self.held = false;
        self.mutex.post()
    }
}

impl<B: SyncBackend> Drop for MutexGuard<'_, B> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        match self.mutex.post() {
            Ok(()) => warn!(object = self.mutex.name(), "released mutex on unwind"),
            Err(err) => error!(object = self.mutex.name(), %err, "failed to release mutex"),
        }
    }
}

/// A pending permit plus the held mutex. Fields drop in declaration order,
/// so an abandoned section returns the permit before releasing the mutex.
pub struct CriticalSection<'a, B: SyncBackend> {
    permit: PermitGuard<'a, B>,
    lock: MutexGuard<'a, B>,
}

impl<'a, B: SyncBackend> CriticalSection<'a, B> {
    pub fn new(permit: PermitGuard<'a, B>, lock: MutexGuard<'a, B>) -> Self {
        Self { permit, lock }
    }

    /// Marks the record durable, then releases the mutex.
    pub fn complete(self) -> Result<(), Error> {
        let Self { permit, lock } = self;
        permit.commit();
        lock.unlock()
    }
}
