// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two-tier get-or-compute engine.

mod builder;
mod load;
mod refresh;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use builder::OrchestratorBuilder;
use strata_tier::{Backend, BackendHealth, Clock, NoBackend};

use crate::config::OrchestratorConfig;
use crate::context::RequestContext;
use crate::error::{BoxError, Result};
use crate::flight::FlightGroup;
use crate::health::{HealthReport, HealthStatus};
use crate::l1::L1Cache;
use crate::reliability::{AdaptiveTimeout, BackpressureController, CircuitBreaker};
use crate::serializer::{JsonSerializer, SerializationError, Serializer};
use crate::stats::{CacheStats, StatsRecorder};
use crate::telemetry::{self, CacheActivity, CacheOperation};

/// Per-call entry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    ttl: Option<Duration>,
    namespace: Option<String>,
}

impl EntryOptions {
    /// Options that use the cache's default TTL and no namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entry lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Tags the entry with a namespace for group invalidation.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Per-entry TTL override.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Namespace tag for bulk invalidation.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

/// A two-tier cache in front of an expensive producer.
///
/// Lookups go to the in-process [`L1Cache`] first. On a miss the orchestrator consults the
/// remote tier `B` through the circuit breaker, admission control and adaptive timeout,
/// takes a per-key distributed lock, checks the remote tier again, and only then runs the
/// producer. The result is written to both tiers before the lock is released, so callers
/// anywhere in the fleet that waited on the lock find the value instead of recomputing.
///
/// Entries older than `ttl × swr_threshold_ratio` are served stale while exactly one
/// background task refreshes them.
///
/// Concurrent callers in the same process that miss on the same key share one load.
/// Built without a backend, the orchestrator serves purely from L1.
///
/// Cloning is cheap; clones share all state.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use strata::{EntryOptions, Orchestrator, RequestContext};
///
/// let cache = Orchestrator::<u64>::builder("squares").build().unwrap();
/// let ctx = RequestContext::new();
///
/// let value = cache
///     .get_or_compute(&ctx, "sq:12", &EntryOptions::new(), || async { Ok::<_, std::io::Error>(144) })
///     .await
///     .unwrap();
/// assert_eq!(value, 144);
/// assert_eq!(cache.stats().misses, 1);
/// # });
/// ```
pub struct Orchestrator<V, B = NoBackend, S = JsonSerializer> {
    inner: Arc<Inner<V, B, S>>,
}

pub(crate) struct Inner<V, B, S> {
    config: OrchestratorConfig,
    clock: Clock,
    l1: L1Cache,
    backend: Option<Arc<B>>,
    serializer: S,
    breaker: Option<Arc<CircuitBreaker>>,
    backpressure: Option<Arc<BackpressureController>>,
    timeout: Option<Arc<AdaptiveTimeout>>,
    flights: FlightGroup<Result<V>>,
    stats: StatsRecorder,
}

impl<V, B, S> Clone for Orchestrator<V, B, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, B, S> fmt::Debug for Orchestrator<V, B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("name", &self.inner.config.name)
            .field("remote", &self.inner.backend.is_some())
            .field("l1", &self.inner.l1.stats())
            .finish_non_exhaustive()
    }
}

impl<V> Orchestrator<V> {
    /// Starts building an L1-only orchestrator for the named resource.
    ///
    /// Use [`OrchestratorBuilder::backend`] to add a remote tier.
    pub fn builder(name: impl Into<String>) -> OrchestratorBuilder<V> {
        OrchestratorBuilder::new(name)
    }
}

impl<V, B, S> Orchestrator<V, B, S>
where
    V: Clone + Send + Sync + 'static,
    B: Backend,
    S: Serializer<V>,
{
    /// Returns the cached value for `key`, or runs `producer` to compute it.
    ///
    /// A stale L1 hit is returned immediately and `producer` is moved into a background
    /// refresh; refresh failures are logged and never reach the caller. Outside a Tokio
    /// runtime the refresh is skipped and the stale value keeps being served.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Producer`](crate::Error::Producer) if the producer fails. With
    /// [`FailurePolicy::Propagate`](crate::FailurePolicy::Propagate), remote-tier failures
    /// on the miss path are returned as well; in safe mode they are absorbed by calling
    /// the producer directly.
    pub async fn get_or_compute<F, Fut, E>(&self, ctx: &RequestContext, key: &str, options: &EntryOptions, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let inner = &self.inner;
        let ttl = options.ttl.unwrap_or(inner.config.default_ttl);

        if let Some(hit) = inner.l1.get_with_swr(key, ttl) {
            match inner.decode(&hit.value) {
                Ok(value) => {
                    inner.stats.l1_hit();
                    inner.event(ctx, CacheOperation::Get, CacheActivity::Hit, None);
                    if hit.needs_refresh {
                        self.spawn_refresh(ctx, key, hit.version, ttl, producer);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    tracing::warn!(cache.name = inner.name(), error = %error, "dropping undecodable in-process entry");
                    inner.l1.invalidate_by_key(key);
                }
            }
        }

        inner
            .flights
            .work(key, || inner.load(ctx, key, ttl, options.namespace(), producer))
            .await
    }

    /// Removes `key` from both tiers.
    ///
    /// Returns `true` if either tier held the key.
    ///
    /// # Errors
    ///
    /// Returns the remote-tier error if the remote delete fails. The in-process entry is
    /// removed regardless.
    pub async fn invalidate(&self, ctx: &RequestContext, key: &str) -> Result<bool> {
        let inner = &self.inner;
        let local = inner.l1.invalidate_by_key(key);

        let remote = match &inner.backend {
            Some(backend) => {
                inner
                    .remote(ctx, CacheOperation::Invalidate, None, || backend.delete(key))
                    .await?
            }
            None => false,
        };

        if local || remote {
            inner.event(ctx, CacheOperation::Invalidate, CacheActivity::Invalidated, None);
        }
        Ok(local || remote)
    }

    /// Removes every in-process entry tagged with `namespace`, returning the count.
    ///
    /// Remote entries are left to expire since the remote tier cannot enumerate keys.
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        let removed = self.inner.l1.invalidate_by_namespace(namespace);
        tracing::info!(cache.name = self.inner.name(), cache.namespace = namespace, removed, "namespace invalidated");
        removed
    }

    /// Removes every in-process entry, returning the count.
    pub fn invalidate_all(&self) -> usize {
        let removed = self.inner.l1.invalidate_all();
        tracing::info!(cache.name = self.inner.name(), removed, "in-process tier cleared");
        removed
    }

    /// Reports the condition of every component.
    ///
    /// The backend health check is bounded by the adaptive timeout's upper bound.
    pub async fn get_health(&self) -> HealthReport {
        let inner = &self.inner;

        let backend = match &inner.backend {
            Some(backend) => {
                let limit = inner.config.adaptive_timeout.max_timeout;
                Some(
                    tokio::time::timeout(limit, backend.health_check())
                        .await
                        .unwrap_or_else(|_| BackendHealth::unhealthy("health check timed out")),
                )
            }
            None => None,
        };
        let circuit_state = inner.breaker.as_ref().map(|breaker| breaker.state());

        HealthReport {
            status: HealthStatus::evaluate(circuit_state, backend.as_ref()),
            circuit_state,
            queue_depth: inner.backpressure.as_ref().map(|gate| gate.queue_depth()),
            in_flight: inner.backpressure.as_ref().map(|gate| gate.in_flight()),
            rejected_count: inner.backpressure.as_ref().map(|gate| gate.rejected_count()),
            timeout_budget: inner.backend.as_ref().map(|_| inner.timeout_budget()),
            l1: inner.l1.stats(),
            stats: self.stats(),
            backend,
        }
    }
}

impl<V, B, S> Orchestrator<V, B, S> {
    /// Request counters accumulated since the cache was built.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let opens = self.inner.breaker.as_ref().map_or(0, |breaker| breaker.opened_count());
        self.inner.stats.snapshot(opens)
    }

    /// The protected resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// The in-process tier.
    #[must_use]
    pub fn l1(&self) -> &L1Cache {
        &self.inner.l1
    }

    /// The remote tier, if one was configured.
    #[must_use]
    pub fn backend(&self) -> Option<&B> {
        self.inner.backend.as_deref()
    }

    /// The circuit breaker, if enabled.
    #[must_use]
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.inner.breaker.as_ref()
    }

    /// The admission gate, if enabled.
    #[must_use]
    pub fn backpressure(&self) -> Option<&Arc<BackpressureController>> {
        self.inner.backpressure.as_ref()
    }

    /// The timeout estimator, if enabled.
    #[must_use]
    pub fn adaptive_timeout(&self) -> Option<&Arc<AdaptiveTimeout>> {
        self.inner.timeout.as_ref()
    }
}

impl<V, B, S> Inner<V, B, S> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn event(&self, ctx: &RequestContext, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        telemetry::record(self.name(), ctx.correlation_id(), operation, activity, duration);
    }

    /// The budget for the next remote call that is not a lock acquisition.
    fn timeout_budget(&self) -> Duration {
        self.timeout
            .as_ref()
            .map_or(self.config.adaptive_timeout.max_timeout, |timeout| timeout.timeout())
    }
}

impl<V, B, S: Serializer<V>> Inner<V, B, S> {
    fn decode(&self, bytes: &[u8]) -> std::result::Result<V, SerializationError> {
        self.serializer.deserialize(bytes, None)
    }
}
