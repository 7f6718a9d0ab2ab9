// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use strata_tier::Backend;
use tokio::runtime::Handle;

use super::{Inner, Orchestrator};
use crate::context::RequestContext;
use crate::error::{BoxError, Error, Result};
use crate::serializer::Serializer;
use crate::telemetry::{CacheActivity, CacheOperation};

/// Clears the refreshing mark unless the refresh committed, including when the task is
/// dropped mid-flight.
struct RefreshGuard<'a, V, B, S> {
    inner: &'a Inner<V, B, S>,
    key: &'a str,
    version: u64,
    armed: bool,
}

impl<V, B, S> Drop for RefreshGuard<'_, V, B, S> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.l1.cancel_refresh(self.key, self.version);
        }
    }
}

impl<V, B, S> Orchestrator<V, B, S>
where
    V: Clone + Send + Sync + 'static,
    B: Backend,
    S: Serializer<V>,
{
    /// Starts the background refresh for a stale entry.
    pub(super) fn spawn_refresh<F, Fut, E>(&self, ctx: &RequestContext, key: &str, version: u64, ttl: Duration, producer: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            tracing::debug!(cache.name = self.inner.name(), cache.key = key, "no runtime for background refresh");
            self.inner.l1.cancel_refresh(key, version);
            return;
        };

        self.inner.event(ctx, CacheOperation::Refresh, CacheActivity::Stale, None);
        let inner = Arc::clone(&self.inner);
        let ctx = ctx.clone();
        let key = key.to_owned();
        handle.spawn(async move { inner.refresh(&ctx, &key, version, ttl, producer).await });
    }
}

impl<V, B, S> Inner<V, B, S>
where
    V: Clone + Send + Sync + 'static,
    B: Backend,
    S: Serializer<V>,
{
    async fn refresh<F, Fut, E>(&self, ctx: &RequestContext, key: &str, version: u64, ttl: Duration, producer: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        self.stats.refresh_started();
        let mut guard = RefreshGuard {
            inner: self,
            key,
            version,
            armed: true,
        };

        match self.try_refresh(ctx, key, version, ttl, producer, &mut guard).await {
            Ok(true) => {
                self.stats.refresh_committed();
                self.event(ctx, CacheOperation::Refresh, CacheActivity::RefreshCommitted, None);
            }
            Ok(false) => {
                self.stats.refresh_aborted();
                self.event(ctx, CacheOperation::Refresh, CacheActivity::RefreshAborted, None);
            }
            Err(error) => {
                self.stats.refresh_aborted();
                self.event(ctx, CacheOperation::Refresh, CacheActivity::RefreshAborted, None);
                tracing::warn!(cache.name = self.name(), cache.key = key, error = %error, "background refresh failed, keeping stale value");
            }
        }
    }

    /// Recomputes `key` and commits it if the entry is still at `version`.
    ///
    /// With a remote tier the refresh only proceeds if the distributed lock is free right
    /// now; another holder is already recomputing the key. The remote tier is written only
    /// after the in-process commit succeeds, so an invalidated key is not resurrected.
    async fn try_refresh<F, Fut, E>(
        &self,
        ctx: &RequestContext,
        key: &str,
        version: u64,
        ttl: Duration,
        producer: F,
        guard: &mut RefreshGuard<'_, V, B, S>,
    ) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<BoxError>,
    {
        let Some(backend) = &self.backend else {
            let value = self.produce(ctx, producer).await?;
            let bytes = self.serializer.serialize(&value)?.bytes;
            let committed = self.l1.complete_refresh(key, version, bytes, self.clock.instant());
            guard.armed = false;
            return Ok(committed);
        };

        let lease = self
            .remote(ctx, CacheOperation::Lock, Some(self.config.lock_timeout), || {
                backend.acquire_lock(key, Duration::ZERO, self.config.lock_ttl)
            })
            .await?;
        if !lease.is_acquired() {
            tracing::debug!(cache.name = self.name(), cache.key = key, "refresh skipped, key is locked elsewhere");
            return Ok(false);
        }

        let mut lease = self.guard_lease(backend, lease);
        let outcome = async {
            let value = self.produce(ctx, producer).await?;
            let bytes = self.serializer.serialize(&value)?.bytes;
            if !self.l1.complete_refresh(key, version, bytes.clone(), self.clock.instant()) {
                guard.armed = false;
                return Ok::<_, Error>(false);
            }
            guard.armed = false;

            if let Err(error) = self
                .remote(ctx, CacheOperation::Insert, None, || backend.set(key, bytes, Some(ttl)))
                .await
            {
                tracing::warn!(cache.name = self.name(), cache.key = key, error = %error, "refreshed value not written to remote tier");
            }
            Ok(true)
        }
        .await;

        self.release(ctx, backend, lease.lease().clone()).await;
        lease.disarm();
        outcome
    }
}
