// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::time::Duration;

use strata_tier::BackendHealth;

use crate::l1::L1Stats;
use crate::reliability::CircuitState;
use crate::stats::CacheStats;

/// Overall condition of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Every component is working normally.
    Healthy,
    /// The cache serves requests but the remote tier is recovering or reports problems.
    Degraded,
    /// The circuit is open; remote-tier calls fail fast.
    Unhealthy,
}

impl HealthStatus {
    /// Lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Derives the status from the breaker state and the backend's own report.
    #[must_use]
    pub fn evaluate(circuit: Option<CircuitState>, backend: Option<&BackendHealth>) -> Self {
        match circuit {
            Some(CircuitState::Open) => Self::Unhealthy,
            Some(CircuitState::HalfOpen) => Self::Degraded,
            _ if backend.is_some_and(|health| !health.is_healthy()) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by [`Orchestrator::get_health`](crate::Orchestrator::get_health).
///
/// Component fields are `None` when the component is disabled or there is no remote tier.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct HealthReport {
    /// Overall condition.
    pub status: HealthStatus,
    /// Circuit breaker state.
    pub circuit_state: Option<CircuitState>,
    /// Callers waiting for admission.
    pub queue_depth: Option<usize>,
    /// Callers inside the admission gate.
    pub in_flight: Option<usize>,
    /// Callers rejected by admission control.
    pub rejected_count: Option<u64>,
    /// Budget the next remote call gets.
    pub timeout_budget: Option<Duration>,
    /// In-process tier usage.
    pub l1: L1Stats,
    /// Request counters.
    pub stats: CacheStats,
    /// The remote tier's own report.
    pub backend: Option<BackendHealth>,
}

impl HealthReport {
    /// Returns `true` unless the status is [`HealthStatus::Unhealthy`].
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}
