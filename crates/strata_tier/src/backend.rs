// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The capability interface every remote tier implements.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;

use crate::BackendError;

/// A shared, remote key/value store used as the second cache tier.
///
/// The interface is intentionally small: byte values, per-key TTLs and a distributed
/// lock scoped to one key. Every operation may fail with a classified [`BackendError`];
/// callers decide from the [`kind`](BackendError::kind) whether the failure says
/// anything about the health of the store.
///
/// Implementations must be safe to call concurrently from many tasks.
pub trait Backend: Send + Sync + 'static {
    /// Reads the bytes stored under `key`, or `None` if the key is absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, BackendError>> + Send;

    /// Stores `value` under `key`. A `ttl` of `None` stores the value without expiry.
    fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Removes `key`, returning `true` if a value was present.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Returns `true` if a live value is stored under `key`.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Returns the remaining lifetime of `key`.
    ///
    /// `None` means the key is absent or has no expiry.
    fn get_ttl(&self, key: &str) -> impl Future<Output = Result<Option<Duration>, BackendError>> + Send;

    /// Resets the remaining lifetime of `key` to `ttl`, returning `false` if the key is absent.
    fn refresh_ttl(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Tries to take the distributed lock for `key`, waiting at most `timeout`.
    ///
    /// A lock that is taken expires on its own after `lease_ttl`, so a crashed holder
    /// cannot block other processes forever. Failing to get the lock in time is not an
    /// error: the returned lease reports [`LockLease::is_acquired`] as `false`.
    fn acquire_lock(
        &self,
        key: &str,
        timeout: Duration,
        lease_ttl: Duration,
    ) -> impl Future<Output = Result<LockLease, BackendError>> + Send;

    /// Releases a lease obtained from [`acquire_lock`](Self::acquire_lock).
    ///
    /// Returns `false` if the lease was never acquired or has already expired and been
    /// taken over by another holder.
    fn release_lock(&self, lease: LockLease) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Reports whether the store is reachable, with implementation-defined details.
    fn health_check(&self) -> impl Future<Output = BackendHealth> + Send;
}

/// The outcome of a distributed lock attempt.
///
/// A lease carries the key and an implementation-defined token that identifies the
/// holder; pass it back to [`Backend::release_lock`] when the protected section ends.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "an acquired lease must be released"]
pub struct LockLease {
    key: String,
    token: Option<u64>,
}

impl LockLease {
    /// Creates a lease for a lock that was taken and is identified by `token`.
    pub fn acquired(key: impl Into<String>, token: u64) -> Self {
        Self {
            key: key.into(),
            token: Some(token),
        }
    }

    /// Creates a lease for a lock that could not be taken in time.
    pub fn not_acquired(key: impl Into<String>) -> Self {
        Self { key: key.into(), token: None }
    }

    /// Returns `true` if the lock is held by this lease.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.token.is_some()
    }

    /// The key the lock is scoped to.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The holder token, if the lock was acquired.
    #[must_use]
    pub fn token(&self) -> Option<u64> {
        self.token
    }
}

/// Result of [`Backend::health_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHealth {
    healthy: bool,
    details: BTreeMap<String, String>,
}

impl BackendHealth {
    /// A healthy report with no details.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            details: BTreeMap::new(),
        }
    }

    /// An unhealthy report carrying `reason` under the `error` detail.
    #[must_use]
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            details: BTreeMap::from([("error".to_owned(), reason.into())]),
        }
    }

    /// Adds a detail entry.
    #[must_use]
    pub fn with_detail(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(name.into(), value.to_string());
        self
    }

    /// Returns `true` if the store is usable.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Implementation-defined details, ordered by name.
    #[must_use]
    pub fn details(&self) -> &BTreeMap<String, String> {
        &self.details
    }
}

/// A backend that cannot exist.
///
/// Used as the backend type of a cache that only has an in-process tier. Because the
/// enum has no variants, no value of it is ever constructed and none of its methods
/// can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoBackend {}

impl Backend for NoBackend {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, BackendError> {
        match *self {}
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Option<Duration>) -> Result<(), BackendError> {
        match *self {}
    }

    async fn delete(&self, _key: &str) -> Result<bool, BackendError> {
        match *self {}
    }

    async fn exists(&self, _key: &str) -> Result<bool, BackendError> {
        match *self {}
    }

    async fn get_ttl(&self, _key: &str) -> Result<Option<Duration>, BackendError> {
        match *self {}
    }

    async fn refresh_ttl(&self, _key: &str, _ttl: Duration) -> Result<bool, BackendError> {
        match *self {}
    }

    async fn acquire_lock(&self, _key: &str, _timeout: Duration, _lease_ttl: Duration) -> Result<LockLease, BackendError> {
        match *self {}
    }

    async fn release_lock(&self, _lease: LockLease) -> Result<bool, BackendError> {
        match *self {}
    }

    async fn health_check(&self) -> BackendHealth {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_reports_acquisition() {
        let lease = LockLease::acquired("k", 7);
        assert!(lease.is_acquired());
        assert_eq!(lease.key(), "k");
        assert_eq!(lease.token(), Some(7));

        let lease = LockLease::not_acquired("k");
        assert!(!lease.is_acquired());
        assert_eq!(lease.token(), None);
    }

    #[test]
    fn health_details_are_ordered() {
        let health = BackendHealth::healthy().with_detail("locks", 2).with_detail("entries", 10);
        assert!(health.is_healthy());
        let names: Vec<_> = health.details().keys().cloned().collect();
        assert_eq!(names, ["entries", "locks"]);
    }

    #[test]
    fn unhealthy_carries_reason() {
        let health = BackendHealth::unhealthy("connection refused");
        assert!(!health.is_healthy());
        assert_eq!(health.details().get("error").map(String::as_str), Some("connection refused"));
    }
}
