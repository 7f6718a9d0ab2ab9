// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strata_tier::{Backend, BackendError, LockLease};
use tokio::runtime::Handle;
use tokio::time::Instant;

use super::Inner;
use crate::config::FailurePolicy;
use crate::context::RequestContext;
use crate::error::{BoxError, Error, Result};
use crate::serializer::Serializer;
use crate::telemetry::{CacheActivity, CacheOperation};

/// Headroom over `lock_timeout` before a lock acquisition is abandoned locally.
const LOCK_GRACE: Duration = Duration::from_millis(500);

/// Holds an acquired lease and releases it in the background if dropped unreleased.
///
/// The lock otherwise stays taken until its lease TTL runs out when a caller is cancelled
/// inside the protected section.
pub(super) struct LeaseGuard<B: Backend> {
    backend: Arc<B>,
    lease: LockLease,
    budget: Duration,
    cache: String,
    armed: bool,
}

impl<B: Backend> LeaseGuard<B> {
    pub(super) fn new(backend: &Arc<B>, lease: LockLease, budget: Duration, cache: &str) -> Self {
        Self {
            backend: Arc::clone(backend),
            lease,
            budget,
            cache: cache.to_owned(),
            armed: true,
        }
    }

    pub(super) fn lease(&self) -> &LockLease {
        &self.lease
    }

    /// Marks the lease as released by its owner.
    pub(super) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<B: Backend> Drop for LeaseGuard<B> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            tracing::debug!(cache.name = self.cache.as_str(), cache.key = self.lease.key(), "no runtime to release distributed lock, leaving it to expire");
            return;
        };

        let backend = Arc::clone(&self.backend);
        let lease = self.lease.clone();
        let budget = self.budget;
        let cache = std::mem::take(&mut self.cache);
        handle.spawn(async move {
            let key = lease.key().to_owned();
            match tokio::time::timeout(budget, backend.release_lock(lease)).await {
                Ok(Ok(_)) => tracing::debug!(cache.name = cache.as_str(), cache.key = key.as_str(), "released abandoned distributed lock"),
                Ok(Err(error)) => {
                    tracing::warn!(cache.name = cache.as_str(), cache.key = key.as_str(), error = %error, "failed to release abandoned distributed lock");
                }
                Err(_) => {
                    tracing::warn!(cache.name = cache.as_str(), cache.key = key.as_str(), "timed out releasing abandoned distributed lock");
                }
            }
        });
    }
}

/// Where a remote read left the load.
enum Lookup<V> {
    Found(V),
    Missing,
}

impl<V, B, S> Inner<V, B, S>
where
    V: Clone + Send + Sync + 'static,
    B: Backend,
    S: Serializer<V>,
{
    /// Loads `key` after an in-process miss. Runs once per key at a time in this process.
    pub(super) async fn load<F, Fut, E>(
        &self,
        ctx: &RequestContext,
        key: &str,
        ttl: Duration,
        namespace: Option<&str>,
        producer: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        // a previous leader may have filled the entry after our first look
        if let Some(value) = self.l1.get(key).and_then(|bytes| self.decode(&bytes).ok()) {
            self.stats.l1_hit();
            self.event(ctx, CacheOperation::Get, CacheActivity::Hit, None);
            return Ok(value);
        }
        self.event(ctx, CacheOperation::Get, CacheActivity::Miss, None);

        let Some(backend) = &self.backend else {
            self.stats.miss();
            let value = self.produce(ctx, producer).await?;
            self.store_local(key, &value, ttl, namespace)?;
            return Ok(value);
        };

        match self.lookup(ctx, backend, key, ttl, namespace).await {
            Ok(Lookup::Found(value)) => return Ok(value),
            Ok(Lookup::Missing) => {}
            Err(error) => return self.degrade(ctx, error, producer).await,
        }

        let lock_budget = self.config.lock_timeout.saturating_add(LOCK_GRACE);
        let lease = match self
            .remote(ctx, CacheOperation::Lock, Some(lock_budget), || {
                backend.acquire_lock(key, self.config.lock_timeout, self.config.lock_ttl)
            })
            .await
        {
            Ok(lease) => lease,
            Err(error) => return self.degrade(ctx, error, producer).await,
        };

        if lease.is_acquired() {
            let mut guard = self.guard_lease(backend, lease);
            let outcome = self.recheck_and_fill(ctx, backend, key, ttl, namespace, producer).await;
            self.release(ctx, backend, guard.lease().clone()).await;
            guard.disarm();
            return outcome;
        }

        tracing::warn!(
            cache.name = self.name(),
            cache.key = key,
            lock.timeout = ?self.config.lock_timeout,
            "distributed lock not acquired, computing without it"
        );
        self.event(ctx, CacheOperation::Lock, CacheActivity::LockContended, None);
        self.recheck_and_fill(ctx, backend, key, ttl, namespace, producer).await
    }

    /// Checks the remote tier once more, then fills the key if it is still missing.
    async fn recheck_and_fill<F, Fut, E>(
        &self,
        ctx: &RequestContext,
        backend: &B,
        key: &str,
        ttl: Duration,
        namespace: Option<&str>,
        producer: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        // another process may have filled the key while we waited on the lock
        match self.lookup(ctx, backend, key, ttl, namespace).await {
            Ok(Lookup::Found(value)) => Ok(value),
            Ok(Lookup::Missing) => self.fill(ctx, backend, key, ttl, namespace, producer).await,
            Err(error) => self.degrade(ctx, error, producer).await,
        }
    }

    /// Runs the producer and writes the result to both tiers.
    async fn fill<F, Fut, E>(
        &self,
        ctx: &RequestContext,
        backend: &B,
        key: &str,
        ttl: Duration,
        namespace: Option<&str>,
        producer: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        self.stats.miss();
        let value = self.produce(ctx, producer).await?;
        let bytes = self.serializer.serialize(&value)?.bytes;

        let written = self
            .remote(ctx, CacheOperation::Insert, None, || backend.set(key, bytes.clone(), Some(ttl)))
            .await;
        if let Err(error) = written {
            match self.config.failure_policy {
                FailurePolicy::Propagate => return Err(error),
                FailurePolicy::SafeMode => {
                    tracing::warn!(cache.name = self.name(), cache.key = key, error = %error, "remote write failed, keeping value in process only");
                }
            }
        }

        self.put_local(ctx, key, bytes, ttl, namespace);
        Ok(value)
    }

    /// Reads `key` from the remote tier and promotes a hit into L1.
    ///
    /// Undecodable remote values are treated as misses so the producer overwrites them.
    async fn lookup(&self, ctx: &RequestContext, backend: &B, key: &str, ttl: Duration, namespace: Option<&str>) -> Result<Lookup<V>> {
        let Some(bytes) = self.remote(ctx, CacheOperation::Get, None, || backend.get(key)).await? else {
            return Ok(Lookup::Missing);
        };

        let value = match self.decode(&bytes) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(cache.name = self.name(), cache.key = key, error = %error, "ignoring undecodable remote entry");
                return Ok(Lookup::Missing);
            }
        };

        // the remote TTL is advisory; promotion falls back to the configured one
        let remaining = self
            .remote(ctx, CacheOperation::Get, None, || backend.get_ttl(key))
            .await
            .ok()
            .flatten()
            .filter(|remaining| !remaining.is_zero())
            .unwrap_or(ttl);

        self.put_local(ctx, key, bytes, remaining, namespace);
        self.stats.l2_hit();
        self.event(ctx, CacheOperation::Get, CacheActivity::L2Hit, None);
        Ok(Lookup::Found(value))
    }

    /// Applies the failure policy to a remote failure that happened before the producer ran.
    async fn degrade<F, Fut, E>(&self, ctx: &RequestContext, error: Error, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        if self.config.failure_policy == FailurePolicy::Propagate || !error.is_remote() {
            return Err(error);
        }

        tracing::warn!(cache.name = self.name(), error = %error, "remote tier unavailable, serving uncached");
        self.stats.miss();
        self.stats.fallback();
        self.event(ctx, CacheOperation::Compute, CacheActivity::Fallback, None);
        self.produce(ctx, producer).await
    }

    pub(super) async fn produce<F, Fut, E>(&self, ctx: &RequestContext, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        let started = Instant::now();
        match producer().await {
            Ok(value) => {
                self.event(ctx, CacheOperation::Compute, CacheActivity::Ok, Some(started.elapsed()));
                Ok(value)
            }
            Err(error) => {
                let error = Error::producer(error);
                self.event(ctx, CacheOperation::Compute, CacheActivity::Error, Some(started.elapsed()));
                Err(error)
            }
        }
    }

    fn store_local(&self, key: &str, value: &V, ttl: Duration, namespace: Option<&str>) -> Result<()> {
        let bytes = self.serializer.serialize(value)?.bytes;
        self.l1.put(key, bytes, ttl, namespace);
        Ok(())
    }

    fn put_local(&self, ctx: &RequestContext, key: &str, bytes: Bytes, ttl: Duration, namespace: Option<&str>) {
        if self.l1.put(key, bytes, ttl, namespace) {
            self.event(ctx, CacheOperation::Insert, CacheActivity::Inserted, None);
        }
    }

    pub(super) fn guard_lease(&self, backend: &Arc<B>, lease: LockLease) -> LeaseGuard<B> {
        LeaseGuard::new(backend, lease, self.config.adaptive_timeout.max_timeout, self.name())
    }

    /// Releases a lease outside the reliability gates so it is never skipped.
    pub(super) async fn release(&self, ctx: &RequestContext, backend: &B, lease: LockLease) {
        let key = lease.key().to_owned();
        let budget = self.config.adaptive_timeout.max_timeout;
        match tokio::time::timeout(budget, backend.release_lock(lease)).await {
            Ok(Ok(_)) => self.event(ctx, CacheOperation::Unlock, CacheActivity::Ok, None),
            Ok(Err(error)) => {
                tracing::warn!(cache.name = self.name(), cache.key = key, error = %error, "failed to release distributed lock");
            }
            Err(_) => {
                tracing::warn!(cache.name = self.name(), cache.key = key, "timed out releasing distributed lock");
            }
        }
    }

    /// Runs one remote-tier call through the breaker, admission control and a timeout.
    ///
    /// `budget` overrides the adaptive budget; such calls are not recorded in the latency
    /// window since their duration reflects waiting rather than remote latency.
    pub(super) async fn remote<T, C, Fut>(&self, ctx: &RequestContext, operation: CacheOperation, budget: Option<Duration>, call: C) -> Result<T>
    where
        C: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let outcome = self.gated(budget, call).await;
        if let Err(error) = &outcome {
            self.stats.error();
            self.event(ctx, operation, CacheActivity::Error, None);
            tracing::debug!(cache.name = self.name(), cache.operation = operation.as_str(), error = %error, "remote call failed");
        }
        outcome
    }

    async fn gated<T, C, Fut>(&self, budget: Option<Duration>, call: C) -> Result<T>
    where
        C: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let permit = self.breaker.as_ref().map(|breaker| breaker.enter()).transpose()?;
        let _admission = match &self.backpressure {
            Some(gate) => Some(gate.acquire().await?),
            None => None,
        };

        let adaptive = budget.is_none();
        let budget = budget.unwrap_or_else(|| self.timeout_budget());
        let started = Instant::now();
        let outcome = match tokio::time::timeout(budget, call()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(Error::Backend(error)),
            Err(_) => Err(Error::Timeout { budget }),
        };

        if adaptive && let Some(timeout) = &self.timeout {
            timeout.record_duration(started.elapsed());
        }

        if let Some(permit) = permit {
            match &outcome {
                Ok(_) => permit.success(),
                Err(error) => permit.failure(error.backend_kind()),
            }
        }
        outcome
    }
}
