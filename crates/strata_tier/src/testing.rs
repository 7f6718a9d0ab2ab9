// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock backend implementation for testing.
//!
//! This module provides [`MockBackend`], an in-memory backend that records all
//! operations and supports classified failure injection and artificial latency
//! for testing error and timeout paths.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{Backend, BackendError, BackendErrorKind, BackendHealth, Clock, LockLease, MemoryBackend};

/// Recorded backend operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
    /// A get operation was performed with the given key.
    Get(String),
    /// A set operation was performed.
    Set {
        /// The key that was written.
        key: String,
        /// The bytes that were written.
        value: Bytes,
        /// The requested time to live.
        ttl: Option<Duration>,
    },
    /// A delete operation was performed with the given key.
    Delete(String),
    /// An exists operation was performed with the given key.
    Exists(String),
    /// A TTL lookup was performed with the given key.
    GetTtl(String),
    /// A TTL refresh was performed.
    RefreshTtl {
        /// The key whose lifetime was reset.
        key: String,
        /// The new time to live.
        ttl: Duration,
    },
    /// A lock acquisition was attempted for the given key.
    AcquireLock(String),
    /// A lock release was performed for the given key.
    ReleaseLock(String),
    /// A health check was performed.
    HealthCheck,
}

impl BackendOp {
    /// Returns the key the operation targeted, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Get(key)
            | Self::Delete(key)
            | Self::Exists(key)
            | Self::GetTtl(key)
            | Self::AcquireLock(key)
            | Self::ReleaseLock(key)
            | Self::Set { key, .. }
            | Self::RefreshTtl { key, .. } => Some(key),
            Self::HealthCheck => None,
        }
    }
}

type FailPredicate = Box<dyn Fn(&BackendOp) -> Option<BackendErrorKind> + Send + Sync>;

/// A configurable mock backend for testing.
///
/// Stores values in a [`MemoryBackend`] and can be configured to fail operations on
/// demand with a chosen [`BackendErrorKind`]. All operations are recorded for later
/// verification, including the ones that failed. Clones share data, recordings and
/// failure configuration.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use strata_tier::testing::{BackendOp, MockBackend};
/// use strata_tier::{Backend, BackendErrorKind};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = MockBackend::new();
///
/// backend.set("key", Bytes::from_static(b"v"), None).await.unwrap();
/// assert_eq!(backend.get("key").await.unwrap(), Some(Bytes::from_static(b"v")));
/// assert_eq!(backend.count(|op| matches!(op, BackendOp::Get(_))), 1);
///
/// // Fail only gets, as a transient network fault
/// backend.fail_when(|op| matches!(op, BackendOp::Get(_)));
/// let error = backend.get("key").await.unwrap_err();
/// assert_eq!(error.kind(), BackendErrorKind::Transient);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockBackend {
    store: MemoryBackend,
    operations: Arc<Mutex<Vec<BackendOp>>>,
    fail_with: Arc<Mutex<Option<FailPredicate>>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("store", &self.store)
            .field("operations", &self.operations)
            .field("fail_with", &self.fail_with.lock().is_some())
            .field("latency", &self.latency)
            .finish()
    }
}

impl MockBackend {
    /// Creates a new empty mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock backend whose value and lock expiry follows `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            store: MemoryBackend::with_clock(clock),
            ..Self::default()
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &MemoryBackend {
        &self.store
    }

    /// Sets a predicate that decides when operations fail with a transient error.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_tier::testing::{BackendOp, MockBackend};
    ///
    /// let backend = MockBackend::new();
    ///
    /// // Fail everything
    /// backend.fail_when(|_| true);
    ///
    /// // Fail lock acquisition for one key
    /// backend.fail_when(|op| matches!(op, BackendOp::AcquireLock(k) if k == "hot"));
    /// ```
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&BackendOp) -> bool + Send + Sync + 'static,
    {
        self.fail_with(move |op| predicate(op).then_some(BackendErrorKind::Transient));
    }

    /// Sets a function that returns the kind of error an operation fails with, or
    /// `None` to let it succeed.
    pub fn fail_with<F>(&self, classify: F)
    where
        F: Fn(&BackendOp) -> Option<BackendErrorKind> + Send + Sync + 'static,
    {
        *self.fail_with.lock() = Some(Box::new(classify));
    }

    /// Clears the failure configuration, allowing all operations to succeed.
    pub fn clear_failures(&self) {
        *self.fail_with.lock() = None;
    }

    /// Delays every operation by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Removes any configured latency.
    pub fn clear_latency(&self) {
        *self.latency.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<BackendOp> {
        self.operations.lock().clone()
    }

    /// Returns the number of recorded operations matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&BackendOp) -> bool) -> usize {
        self.operations.lock().iter().filter(|op| predicate(op)).count()
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    async fn enter(&self, op: BackendOp) -> Result<(), BackendError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self.fail_with.lock().as_ref().and_then(|classify| classify(&op));
        let result = match failure {
            Some(kind) => Err(BackendError::new(kind, format!("mock: {op:?} failed"))),
            None => Ok(()),
        };
        self.operations.lock().push(op);
        result
    }
}

impl Backend for MockBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        self.enter(BackendOp::Get(key.to_owned())).await?;
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), BackendError> {
        self.enter(BackendOp::Set {
            key: key.to_owned(),
            value: value.clone(),
            ttl,
        })
        .await?;
        self.store.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.enter(BackendOp::Delete(key.to_owned())).await?;
        self.store.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        self.enter(BackendOp::Exists(key.to_owned())).await?;
        self.store.exists(key).await
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>, BackendError> {
        self.enter(BackendOp::GetTtl(key.to_owned())).await?;
        self.store.get_ttl(key).await
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        self.enter(BackendOp::RefreshTtl { key: key.to_owned(), ttl }).await?;
        self.store.refresh_ttl(key, ttl).await
    }

    async fn acquire_lock(&self, key: &str, timeout: Duration, lease_ttl: Duration) -> Result<LockLease, BackendError> {
        self.enter(BackendOp::AcquireLock(key.to_owned())).await?;
        self.store.acquire_lock(key, timeout, lease_ttl).await
    }

    async fn release_lock(&self, lease: LockLease) -> Result<bool, BackendError> {
        self.enter(BackendOp::ReleaseLock(lease.key().to_owned())).await?;
        self.store.release_lock(lease).await
    }

    async fn health_check(&self) -> BackendHealth {
        match self.enter(BackendOp::HealthCheck).await {
            Ok(()) => self.store.health_check().await.with_detail("backend", "mock"),
            Err(error) => BackendHealth::unhealthy(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_operations_are_recorded() {
        let backend = MockBackend::new();
        backend.fail_with(|op| matches!(op, BackendOp::Delete(_)).then_some(BackendErrorKind::Permanent));

        let error = backend.delete("k").await.unwrap_err();
        assert_eq!(error.kind(), BackendErrorKind::Permanent);
        assert_eq!(backend.operations(), vec![BackendOp::Delete("k".to_owned())]);

        backend.clear_failures();
        assert!(!backend.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn unhealthy_when_health_check_fails() {
        let backend = MockBackend::new();
        assert!(backend.health_check().await.is_healthy());

        backend.fail_when(|op| *op == BackendOp::HealthCheck);
        assert!(!backend.health_check().await.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_operations() {
        let backend = MockBackend::new();
        backend.set_latency(Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        backend.exists("k").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn op_key() {
        assert_eq!(BackendOp::Get("a".to_owned()).key(), Some("a"));
        assert_eq!(BackendOp::HealthCheck.key(), None);
    }
}
