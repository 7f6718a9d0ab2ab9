// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use strata_tier::{Backend, Clock, NoBackend};

use super::{Inner, Orchestrator};
use crate::Jitter;
use crate::config::{
    AdaptiveTimeoutConfig, BackpressureConfig, CircuitBreakerConfig, FailurePolicy, L1Config, OrchestratorConfig,
};
use crate::error::Result;
use crate::flight::FlightGroup;
use crate::l1::L1Cache;
use crate::registry::ResourceRegistry;
use crate::serializer::{JsonSerializer, Serializer};
use crate::stats::StatsRecorder;

/// Builds an [`Orchestrator`].
///
/// The remote tier and serializer are type parameters, so swapping them changes the
/// builder's type. Everything else is plain configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata::tier::MemoryBackend;
/// use strata::{FailurePolicy, Orchestrator};
///
/// let cache = Orchestrator::<String>::builder("profiles")
///     .backend(MemoryBackend::new())
///     .default_ttl(Duration::from_secs(300))
///     .failure_policy(FailurePolicy::Propagate)
///     .build()
///     .unwrap();
/// assert!(cache.circuit_breaker().is_some());
/// ```
pub struct OrchestratorBuilder<V, B = NoBackend, S = JsonSerializer> {
    config: OrchestratorConfig,
    backend: Option<B>,
    serializer: S,
    clock: Option<Clock>,
    jitter: Option<Jitter>,
    registry: Option<ResourceRegistry>,
    _value: PhantomData<fn() -> V>,
}

impl<V, B, S> fmt::Debug for OrchestratorBuilder<V, B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("remote", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl<V> OrchestratorBuilder<V> {
    /// Starts an L1-only configuration for the named resource with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: OrchestratorConfig::new(name),
            backend: None,
            serializer: JsonSerializer,
            clock: None,
            jitter: None,
            registry: None,
            _value: PhantomData,
        }
    }
}

impl<V, B, S> OrchestratorBuilder<V, B, S> {
    /// Adds a remote tier.
    pub fn backend<B2: Backend>(self, backend: B2) -> OrchestratorBuilder<V, B2, S> {
        OrchestratorBuilder {
            config: self.config,
            backend: Some(backend),
            serializer: self.serializer,
            clock: self.clock,
            jitter: self.jitter,
            registry: self.registry,
            _value: PhantomData,
        }
    }

    /// Replaces the value codec.
    pub fn serializer<S2: Serializer<V>>(self, serializer: S2) -> OrchestratorBuilder<V, B, S2> {
        OrchestratorBuilder {
            config: self.config,
            backend: self.backend,
            serializer,
            clock: self.clock,
            jitter: self.jitter,
            registry: self.registry,
            _value: PhantomData,
        }
    }

    /// Replaces the whole configuration, keeping nothing set so far except the name.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        let name = std::mem::take(&mut self.config.name);
        self.config = config;
        if self.config.name.is_empty() {
            self.config.name = name;
        }
        self
    }

    /// Sets the in-process tier configuration.
    #[must_use]
    pub fn l1(mut self, config: L1Config) -> Self {
        self.config.l1 = config;
        self
    }

    /// Enables the circuit breaker with `config`.
    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self.config.circuit_breaker_enabled = true;
        self
    }

    /// Enables admission control with `config`.
    #[must_use]
    pub fn backpressure(mut self, config: BackpressureConfig) -> Self {
        self.config.backpressure = config;
        self.config.backpressure_enabled = true;
        self
    }

    /// Enables latency-derived timeouts with `config`.
    #[must_use]
    pub fn adaptive_timeout(mut self, config: AdaptiveTimeoutConfig) -> Self {
        self.config.adaptive_timeout = config;
        self.config.adaptive_timeout_enabled = true;
        self
    }

    /// Turns the circuit breaker off.
    #[must_use]
    pub fn without_circuit_breaker(mut self) -> Self {
        self.config.circuit_breaker_enabled = false;
        self
    }

    /// Turns admission control off.
    #[must_use]
    pub fn without_backpressure(mut self) -> Self {
        self.config.backpressure_enabled = false;
        self
    }

    /// Uses the adaptive timeout's upper bound for every remote call.
    #[must_use]
    pub fn without_adaptive_timeout(mut self) -> Self {
        self.config.adaptive_timeout_enabled = false;
        self
    }

    /// Chooses what happens when the remote tier fails on the miss path.
    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// TTL for entries stored without an explicit one.
    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Sets how long a miss waits for the distributed lock and how long the lease lives.
    #[must_use]
    pub fn lock(mut self, timeout: Duration, lease_ttl: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self.config.lock_ttl = lease_ttl;
        self
    }

    /// Uses `clock` for entry expiry, staleness and breaker recovery.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses `jitter` to spread refresh thresholds.
    #[must_use]
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Shares reliability primitives with other caches protecting the same resource.
    ///
    /// Primitives taken from a registry use the registry's clock.
    #[must_use]
    pub fn registry(mut self, registry: ResourceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl<V, B, S> OrchestratorBuilder<V, B, S>
where
    V: Clone + Send + Sync + 'static,
    B: Backend,
    S: Serializer<V>,
{
    /// Validates the configuration and builds the cache.
    ///
    /// Reliability primitives are only created when there is a remote tier to protect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if a setting is out of range.
    pub fn build(self) -> Result<Orchestrator<V, B, S>> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(Clock::new_system);
        let l1 = L1Cache::new(config.l1.clone())
            .with_clock(clock.clone())
            .with_jitter(self.jitter.unwrap_or_else(Jitter::random));

        let remote = self.backend.is_some();
        let registry = self.registry;
        let name = config.name.as_str();

        let breaker = (remote && config.circuit_breaker_enabled).then(|| match &registry {
            Some(registry) => registry.circuit_breaker(name, &config.circuit_breaker),
            None => Arc::new(crate::CircuitBreaker::new(name, config.circuit_breaker.clone()).with_clock(clock.clone())),
        });
        let backpressure = (remote && config.backpressure_enabled).then(|| match &registry {
            Some(registry) => registry.backpressure(name, &config.backpressure),
            None => Arc::new(crate::BackpressureController::new(name, config.backpressure.clone())),
        });
        let timeout = (remote && config.adaptive_timeout_enabled).then(|| match &registry {
            Some(registry) => registry.adaptive_timeout(name, &config.adaptive_timeout),
            None => Arc::new(crate::AdaptiveTimeout::new(config.adaptive_timeout.clone())),
        });

        tracing::debug!(
            cache.name = name,
            cache.remote = remote,
            cache.circuit_breaker = breaker.is_some(),
            cache.backpressure = backpressure.is_some(),
            cache.adaptive_timeout = timeout.is_some(),
            "cache built"
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                config,
                clock,
                l1,
                backend: self.backend.map(Arc::new),
                serializer: self.serializer,
                breaker,
                backpressure,
                timeout,
                flights: FlightGroup::default(),
                stats: StatsRecorder::default(),
            }),
        })
    }
}
