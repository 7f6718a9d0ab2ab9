// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use dashmap::DashMap;
use strata_tier::Clock;

use crate::config::{AdaptiveTimeoutConfig, BackpressureConfig, CircuitBreakerConfig};
use crate::reliability::{AdaptiveTimeout, BackpressureController, CircuitBreaker};

/// Hands out one set of reliability primitives per resource name.
///
/// Caches built against the same registry and resource name share their circuit breaker,
/// admission gate and timeout estimator, so one unhealthy backend trips every cache that
/// uses it. The first configuration registered for a name wins; later requests for the
/// same name get the existing instance.
///
/// Cloning the registry is cheap and clones share state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use strata::{CircuitBreakerConfig, ResourceRegistry};
///
/// let registry = ResourceRegistry::new();
/// let a = registry.circuit_breaker("redis", &CircuitBreakerConfig::default());
/// let b = registry.circuit_breaker("redis", &CircuitBreakerConfig::default());
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    clock: Clock,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    gates: Arc<DashMap<String, Arc<BackpressureController>>>,
    timeouts: Arc<DashMap<String, Arc<AdaptiveTimeout>>>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    /// Creates an empty registry whose breakers use the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::new_system())
    }

    /// Creates an empty registry whose breakers use `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            breakers: Arc::default(),
            gates: Arc::default(),
            timeouts: Arc::default(),
        }
    }

    /// The circuit breaker for `name`, created from `config` if absent.
    pub fn circuit_breaker(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(name.to_owned()).or_insert_with(|| {
            tracing::debug!(registry.resource = name, "registering circuit breaker");
            Arc::new(CircuitBreaker::new(name, config.clone()).with_clock(self.clock.clone()))
        });
        Arc::clone(entry.value())
    }

    /// The admission gate for `name`, created from `config` if absent.
    pub fn backpressure(&self, name: &str, config: &BackpressureConfig) -> Arc<BackpressureController> {
        if let Some(existing) = self.gates.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .gates
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(BackpressureController::new(name, config.clone())));
        Arc::clone(entry.value())
    }

    /// The timeout estimator for `name`, created from `config` if absent.
    pub fn adaptive_timeout(&self, name: &str, config: &AdaptiveTimeoutConfig) -> Arc<AdaptiveTimeout> {
        if let Some(existing) = self.timeouts.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .timeouts
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(AdaptiveTimeout::new(config.clone())));
        Arc::clone(entry.value())
    }

    /// Resource names with at least one registered primitive, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .iter()
            .map(|e| e.key().clone())
            .chain(self.gates.iter().map(|e| e.key().clone()))
            .chain(self.timeouts.iter().map(|e| e.key().clone()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Number of distinct resource names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names().len()
    }

    /// Returns `true` if no primitive has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty() && self.gates.is_empty() && self.timeouts.is_empty()
    }
}
