// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-process [`Backend`] for tests, examples and single-node deployments.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{Backend, BackendError, BackendHealth, Clock, LockLease};

const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A [`Backend`] that keeps values and locks in process memory.
///
/// Expiry of values and lock leases is measured with the configured [`Clock`], so
/// tests can expire entries by advancing a [`ClockControl`](crate::ClockControl).
/// Clones share the same storage, which lets several caches in one process act like
/// several processes sharing one remote store.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use strata_tier::{Backend, MemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), strata_tier::BackendError> {
/// let backend = MemoryBackend::new();
/// backend.set("user:1", Bytes::from_static(b"alice"), Some(Duration::from_secs(60))).await?;
/// assert_eq!(backend.get("user:1").await?, Some(Bytes::from_static(b"alice")));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
    poll_interval: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    clock: Clock,
    values: Mutex<HashMap<String, Stored>>,
    locks: Mutex<HashMap<String, HeldLock>>,
    released: Notify,
    next_token: AtomicU64,
}

#[derive(Debug)]
struct Stored {
    value: Bytes,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct HeldLock {
    token: u64,
    // `None` when the lease is too long to represent
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

impl HeldLock {
    fn is_held(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

impl MemoryBackend {
    /// Creates an empty backend using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend that measures expiry with `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Arc::new(Inner { clock, ..Inner::default() }),
            poll_interval: None,
        }
    }

    /// Sets how often a waiting lock acquirer re-checks for an expired lease.
    ///
    /// Released locks wake waiters immediately; polling only matters for leases that
    /// expire without being released.
    #[must_use]
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Returns the number of live values.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.inner.clock.instant();
        self.inner.values.lock().values().filter(|stored| stored.is_live(now)).count()
    }

    /// Returns `true` if no live values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if an unexpired lock is held for `key`.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        let now = self.inner.clock.instant();
        self.inner.locks.lock().get(key).is_some_and(|held| held.is_held(now))
    }

    /// Removes every value. Held locks are left untouched.
    pub fn clear(&self) {
        self.inner.values.lock().clear();
    }

    fn try_lock(&self, key: &str, lease_ttl: Duration) -> Option<u64> {
        let now = self.inner.clock.instant();
        let mut locks = self.inner.locks.lock();
        if locks.get(key).is_some_and(|held| held.is_held(now)) {
            return None;
        }

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        locks.insert(
            key.to_owned(),
            HeldLock {
                token,
                expires_at: now.checked_add(lease_ttl),
            },
        );
        Some(token)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(DEFAULT_LOCK_POLL_INTERVAL)
    }
}

impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let now = self.inner.clock.instant();
        let mut values = self.inner.values.lock();
        match values.get(key) {
            Some(stored) if stored.is_live(now) => Ok(Some(stored.value.clone())),
            Some(_) => {
                values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), BackendError> {
        // a TTL past the end of representable time never expires
        let now = self.inner.clock.instant();
        let expires_at = ttl.and_then(|ttl| now.checked_add(ttl));
        self.inner.values.lock().insert(key.to_owned(), Stored { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let now = self.inner.clock.instant();
        Ok(self.inner.values.lock().remove(key).is_some_and(|stored| stored.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let now = self.inner.clock.instant();
        Ok(self.inner.values.lock().get(key).is_some_and(|stored| stored.is_live(now)))
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>, BackendError> {
        let now = self.inner.clock.instant();
        Ok(self
            .inner
            .values
            .lock()
            .get(key)
            .filter(|stored| stored.is_live(now))
            .and_then(|stored| stored.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        let now = self.inner.clock.instant();
        let mut values = self.inner.values.lock();
        match values.get_mut(key) {
            Some(stored) if stored.is_live(now) => {
                stored.expires_at = now.checked_add(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn acquire_lock(&self, key: &str, timeout: Duration, lease_ttl: Duration) -> Result<LockLease, BackendError> {
        // `None` waits without a deadline
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            // Register interest before checking so a release between the check and the
            // wait is not missed.
            let mut released = pin!(self.inner.released.notified());
            released.as_mut().enable();

            if let Some(token) = self.try_lock(key, lease_ttl) {
                return Ok(LockLease::acquired(key, token));
            }

            let now = tokio::time::Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Ok(LockLease::not_acquired(key));
            }

            let wake_at = match (deadline, now.checked_add(self.poll_interval())) {
                (Some(deadline), Some(next_poll)) => Some(deadline.min(next_poll)),
                (deadline, next_poll) => deadline.or(next_poll),
            };
            match wake_at {
                // Elapsing is expected here; either way the loop re-checks the lock.
                Some(wake_at) => {
                    let _ = tokio::time::timeout_at(wake_at, released).await;
                }
                None => released.await,
            }
        }
    }

    async fn release_lock(&self, lease: LockLease) -> Result<bool, BackendError> {
        let Some(token) = lease.token() else {
            return Ok(false);
        };

        let released = {
            let mut locks = self.inner.locks.lock();
            if locks.get(lease.key()).is_some_and(|held| held.token == token) {
                locks.remove(lease.key());
                true
            } else {
                false
            }
        };

        if released {
            self.inner.released.notify_waiters();
        }
        Ok(released)
    }

    async fn health_check(&self) -> BackendHealth {
        let locks = self.inner.locks.lock().len();
        BackendHealth::healthy()
            .with_detail("backend", "memory")
            .with_detail("entries", self.len())
            .with_detail("locks", locks)
    }
}
