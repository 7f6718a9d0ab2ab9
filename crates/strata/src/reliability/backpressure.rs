// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::BackpressureConfig;
use crate::error::OverloadReason;
use crate::{Error, Result};

/// Admission control in front of the remote tier.
///
/// At most `max_concurrent` callers hold a permit at once. Up to `queue_size` more may wait,
/// each for at most `timeout`. Everyone else is rejected immediately.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// use strata::{BackpressureController, BackpressureConfig};
///
/// let gate = BackpressureController::new("users", BackpressureConfig::default().with_max_concurrent(1).with_queue_size(0));
/// let held = gate.acquire().await.unwrap();
/// assert!(gate.acquire().await.is_err());
/// drop(held);
/// assert!(gate.acquire().await.is_ok());
/// # });
/// ```
#[derive(Debug)]
pub struct BackpressureController {
    name: String,
    config: BackpressureConfig,
    semaphore: Semaphore,
    waiting: AtomicUsize,
    rejected: AtomicU64,
}

impl BackpressureController {
    /// Creates a gate with every permit available.
    pub fn new(name: impl Into<String>, config: BackpressureConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Semaphore::new(config.max_concurrent.min(Semaphore::MAX_PERMITS)),
            config,
            waiting: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// The protected resource.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for a permit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overloaded`] when there is no capacity at all, when the wait queue
    /// is full, or when no permit frees up within the configured timeout.
    pub async fn acquire(&self) -> Result<BackpressurePermit<'_>> {
        if self.config.max_concurrent == 0 {
            return Err(self.reject(OverloadReason::NoCapacity));
        }

        if let Ok(permit) = self.semaphore.try_acquire() {
            return Ok(BackpressurePermit { _permit: permit });
        }

        let Some(_slot) = QueueSlot::enter(&self.waiting, self.config.queue_size) else {
            return Err(self.reject(OverloadReason::QueueFull));
        };

        match tokio::time::timeout(self.config.timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(BackpressurePermit { _permit: permit }),
            // the semaphore is never closed
            Ok(Err(_)) => Err(self.reject(OverloadReason::NoCapacity)),
            Err(_) => Err(self.reject(OverloadReason::WaitTimeout)),
        }
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Callers waiting for a permit.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Permits currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Callers rejected so far.
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Clears the rejection counter.
    pub fn reset_stats(&self) {
        self.rejected.store(0, Ordering::Relaxed);
    }

    fn reject(&self, reason: OverloadReason) -> Error {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            backpressure.name = self.name.as_str(),
            backpressure.reason = %reason,
            backpressure.queue_depth = self.queue_depth(),
            "request rejected by backpressure"
        );
        Error::Overloaded {
            resource: self.name.clone(),
            reason,
        }
    }
}

/// A held slot in the gated region, released on drop.
#[derive(Debug)]
pub struct BackpressurePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

/// A place in the wait queue, released on drop.
struct QueueSlot<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> QueueSlot<'a> {
    fn enter(waiting: &'a AtomicUsize, bound: usize) -> Option<Self> {
        waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < bound).then_some(n + 1))
            .ok()
            .map(|_| Self { waiting })
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}
