//! Per-resource exclusive locker
//!
//! Serializes read-modify-write cycles against a shared on-disk resource,
//! such as a container's property file.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Error type for locker operations
#[derive(Debug, Error)]
pub enum LockerError {
    #[error("Lock is currently held")]
    Busy,

    #[error("Lock acquisition was cancelled")]
    Cancelled,
}

/// An exclusive lock around one shared resource.
///
/// Guards are owned, so a `Locker` can be handed out through an `Arc`
/// registry and held across await points.
pub struct Locker {
    semaphore: Arc<Semaphore>,
}

impl Locker {
    /// Create a new locker
    pub fn new() -> Self {
        Self {
            // Semaphore with 1 permit = mutual exclusion
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Acquire the lock, waiting indefinitely if needed.
    ///
    /// Returns a guard that releases the lock when dropped.
    pub async fn acquire(&self) -> Result<LockerGuard, LockerError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LockerError::Cancelled)?;

        Ok(LockerGuard { _permit: permit })
    }

    /// Try to acquire the lock immediately without waiting.
    ///
    /// Returns an error if the lock is already held.
    pub fn try_acquire(&self) -> Result<LockerGuard, LockerError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(LockerGuard { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(LockerError::Busy),
            Err(TryAcquireError::Closed) => Err(LockerError::Cancelled),
        }
    }

    /// Check if the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for Locker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that releases the lock when dropped
pub struct LockerGuard {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let locker = Locker::new();

        assert!(!locker.is_locked());
        let guard = locker.acquire().await.unwrap();
        assert!(locker.is_locked());

        // Try acquire should fail while held
        assert!(locker.try_acquire().is_err());

        drop(guard);
        assert!(!locker.is_locked());

        let _guard = assert_ok!(locker.try_acquire());
        assert!(locker.is_locked());
    }

    #[tokio::test]
    async fn test_guard_outlives_locker_reference() {
        let locker = Arc::new(Locker::new());
        let guard = locker.acquire().await.unwrap();

        let locker2 = locker.clone();
        drop(locker);

        assert!(locker2.is_locked());
        drop(guard);
        assert!(!locker2.is_locked());
    }
}
