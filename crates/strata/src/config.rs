// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Typed configuration for every cache component.
//!
//! Each struct has a [`Default`] matching the production defaults, chained `with_*`
//! setters and a `validate` method. All of them can be loaded with `serde`.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_tier::BackendErrorKind;

const MIB: usize = 1024 * 1024;

/// A configuration value was out of range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ConfigError {
    field: &'static str,
    reason: String,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    /// The name of the offending setting.
    #[must_use]
    pub fn field(&self) -> &'static str {
        self.field
    }
}

fn ensure(condition: bool, field: &'static str, reason: &str) -> Result<(), ConfigError> {
    if condition { Ok(()) } else { Err(ConfigError::new(field, reason)) }
}

/// Settings for the in-process tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct L1Config {
    /// Upper bound on the bytes held by resident entries.
    pub max_memory_bytes: usize,
    /// Largest single entry that is admitted. Defaults to a tenth of the memory budget.
    pub max_entry_bytes: Option<usize>,
    /// Whether aging entries trigger a background refresh.
    pub swr_enabled: bool,
    /// Fraction of the TTL after which an entry counts as stale, in `(0, 1]`.
    pub swr_threshold_ratio: f64,
    /// Whether namespace membership is indexed. Without the index, namespace
    /// invalidation scans every entry.
    pub namespace_index: bool,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            max_memory_bytes: 100 * MIB,
            max_entry_bytes: None,
            swr_enabled: true,
            swr_threshold_ratio: 0.5,
            namespace_index: true,
        }
    }
}

impl L1Config {
    /// Sets the memory budget.
    #[must_use]
    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Sets the largest admitted entry.
    #[must_use]
    pub fn with_max_entry_bytes(mut self, bytes: usize) -> Self {
        self.max_entry_bytes = Some(bytes);
        self
    }

    /// Enables or disables stale-while-revalidate.
    #[must_use]
    pub fn with_swr(mut self, enabled: bool) -> Self {
        self.swr_enabled = enabled;
        self
    }

    /// Sets the staleness threshold as a fraction of the TTL.
    #[must_use]
    pub fn with_swr_threshold_ratio(mut self, ratio: f64) -> Self {
        self.swr_threshold_ratio = ratio;
        self
    }

    /// Enables or disables the namespace index.
    #[must_use]
    pub fn with_namespace_index(mut self, enabled: bool) -> Self {
        self.namespace_index = enabled;
        self
    }

    /// The effective single-entry limit.
    #[must_use]
    pub fn entry_limit(&self) -> usize {
        self.max_entry_bytes.unwrap_or(self.max_memory_bytes / 10)
    }

    /// Checks that every setting is in range.
    ///
    /// # Errors
    ///
    /// Returns the first setting that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.max_memory_bytes > 0, "max_memory_bytes", "must be greater than zero")?;
        ensure(
            self.entry_limit() <= self.max_memory_bytes,
            "max_entry_bytes",
            "must not exceed max_memory_bytes",
        )?;
        ensure(
            self.swr_threshold_ratio > 0.0 && self.swr_threshold_ratio <= 1.0,
            "swr_threshold_ratio",
            "must be in (0, 1]",
        )
    }
}

/// Settings for the circuit breaker guarding the remote tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct CircuitBreakerConfig {
    /// Consecutive qualifying failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// Time after the last failure before probes are let through.
    pub recovery_timeout: Duration,
    /// Probe calls admitted concurrently while half-open.
    pub half_open_requests: u32,
    /// Error kinds that never count as failures.
    pub excluded_kinds: BTreeSet<BackendErrorKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            half_open_requests: 1,
            excluded_kinds: BTreeSet::from([BackendErrorKind::Permanent, BackendErrorKind::Authentication]),
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the success threshold.
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Sets the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Sets the number of concurrent half-open probes.
    #[must_use]
    pub fn with_half_open_requests(mut self, requests: u32) -> Self {
        self.half_open_requests = requests;
        self
    }

    /// Replaces the set of excluded error kinds.
    #[must_use]
    pub fn with_excluded_kinds(mut self, kinds: impl IntoIterator<Item = BackendErrorKind>) -> Self {
        self.excluded_kinds = kinds.into_iter().collect();
        self
    }

    /// Returns `true` if a failure of `kind` counts towards opening the circuit.
    #[must_use]
    pub fn counts(&self, kind: BackendErrorKind) -> bool {
        !self.excluded_kinds.contains(&kind)
    }

    /// Checks that every setting is in range.
    ///
    /// # Errors
    ///
    /// Returns the first setting that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.failure_threshold > 0, "failure_threshold", "must be at least 1")?;
        ensure(self.success_threshold > 0, "success_threshold", "must be at least 1")?;
        ensure(self.half_open_requests > 0, "half_open_requests", "must be at least 1")
    }
}

/// Settings for admission control in front of the remote tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct BackpressureConfig {
    /// Calls allowed inside the gated region at once. Zero rejects every call.
    pub max_concurrent: usize,
    /// Callers allowed to wait for a permit at once.
    pub queue_size: usize,
    /// Longest time a caller waits for a permit.
    pub timeout: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            queue_size: 1000,
            timeout: Duration::from_millis(100),
        }
    }
}

impl BackpressureConfig {
    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Sets the wait-queue bound.
    #[must_use]
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Sets the admission timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks that every setting is in range.
    ///
    /// # Errors
    ///
    /// Returns the first setting that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.max_concurrent <= tokio::sync::Semaphore::MAX_PERMITS,
            "max_concurrent",
            "exceeds the largest supported permit count",
        )
    }
}

/// Settings for the latency-tracking timeout estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct AdaptiveTimeoutConfig {
    /// Number of recent durations kept.
    pub window_size: usize,
    /// Percentile of the window the budget is based on, in `(0, 100]`.
    pub percentile: f64,
    /// Lower bound of the budget.
    pub min_timeout: Duration,
    /// Upper bound of the budget.
    pub max_timeout: Duration,
    /// Headroom added on top of the percentile, as a fraction.
    pub buffer_ratio: f64,
    /// Samples needed before the window is trusted.
    pub min_samples: usize,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            percentile: 95.0,
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(30),
            buffer_ratio: 0.5,
            min_samples: 10,
        }
    }
}

impl AdaptiveTimeoutConfig {
    /// Sets the window size.
    #[must_use]
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Sets the percentile.
    #[must_use]
    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = percentile;
        self
    }

    /// Sets the budget bounds.
    #[must_use]
    pub fn with_bounds(mut self, min_timeout: Duration, max_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self.max_timeout = max_timeout;
        self
    }

    /// Sets the headroom fraction.
    #[must_use]
    pub fn with_buffer_ratio(mut self, buffer_ratio: f64) -> Self {
        self.buffer_ratio = buffer_ratio;
        self
    }

    /// Sets the number of samples needed before the window is trusted.
    #[must_use]
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Checks that every setting is in range.
    ///
    /// # Errors
    ///
    /// Returns the first setting that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.window_size > 0, "window_size", "must be at least 1")?;
        ensure(
            self.percentile > 0.0 && self.percentile <= 100.0,
            "percentile",
            "must be in (0, 100]",
        )?;
        ensure(self.min_timeout <= self.max_timeout, "min_timeout", "must not exceed max_timeout")?;
        ensure(
            self.buffer_ratio.is_finite() && self.buffer_ratio >= 0.0,
            "buffer_ratio",
            "must be a non-negative number",
        )?;
        ensure(
            self.min_samples > 0 && self.min_samples <= self.window_size,
            "min_samples",
            "must be between 1 and window_size",
        )
    }
}

/// What the cache does when the remote tier fails on the miss path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Call the producer directly and return its result without caching it.
    #[default]
    SafeMode,
    /// Return the remote-tier error to the caller.
    Propagate,
}

/// Settings for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct OrchestratorConfig {
    /// Name of the protected resource, used in logs, errors and the registry.
    pub name: String,
    /// TTL used when a call does not set one.
    pub default_ttl: Duration,
    /// Longest time to wait for the distributed lock.
    pub lock_timeout: Duration,
    /// Lifetime of a lock lease, bounding how long a crashed holder blocks others.
    pub lock_ttl: Duration,
    /// Behavior when the remote tier fails on the miss path.
    pub failure_policy: FailurePolicy,
    /// Whether remote calls pass through a circuit breaker.
    pub circuit_breaker_enabled: bool,
    /// Whether remote calls pass through admission control.
    pub backpressure_enabled: bool,
    /// Whether remote calls use a latency-tracking budget instead of the maximum.
    pub adaptive_timeout_enabled: bool,
    /// In-process tier settings.
    pub l1: L1Config,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Admission control settings.
    pub backpressure: BackpressureConfig,
    /// Timeout estimator settings.
    pub adaptive_timeout: AdaptiveTimeoutConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            default_ttl: Duration::from_secs(3600),
            lock_timeout: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(30),
            failure_policy: FailurePolicy::SafeMode,
            circuit_breaker_enabled: true,
            backpressure_enabled: true,
            adaptive_timeout_enabled: true,
            l1: L1Config::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            backpressure: BackpressureConfig::default(),
            adaptive_timeout: AdaptiveTimeoutConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default configuration for the named resource.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Checks this configuration and every nested one.
    ///
    /// # Errors
    ///
    /// Returns the first setting that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(!self.name.is_empty(), "name", "must not be empty")?;
        ensure(!self.default_ttl.is_zero(), "default_ttl", "must be greater than zero")?;
        ensure(!self.lock_ttl.is_zero(), "lock_ttl", "must be greater than zero")?;
        self.l1.validate()?;
        self.circuit_breaker.validate()?;
        self.backpressure.validate()?;
        self.adaptive_timeout.validate()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn entry_limit_follows_budget() {
        let config = L1Config::default().with_max_memory_bytes(1000);
        assert_eq!(config.entry_limit(), 100);
        assert_eq!(config.with_max_entry_bytes(250).entry_limit(), 250);
    }

    #[test]
    fn default_breaker_ignores_caller_errors() {
        let config = CircuitBreakerConfig::default();
        assert!(config.counts(BackendErrorKind::Transient));
        assert!(config.counts(BackendErrorKind::Timeout));
        assert!(config.counts(BackendErrorKind::Unknown));
        assert!(!config.counts(BackendErrorKind::Permanent));
        assert!(!config.counts(BackendErrorKind::Authentication));
    }

    #[rstest]
    #[case(0.0, false)]
    #[case(0.01, true)]
    #[case(1.0, true)]
    #[case(1.5, false)]
    #[case(f64::NAN, false)]
    fn swr_ratio_range(#[case] ratio: f64, #[case] valid: bool) {
        let result = L1Config::default().with_swr_threshold_ratio(ratio).validate();
        assert_eq!(result.is_ok(), valid, "ratio {ratio}");
    }

    #[rstest]
    #[case(AdaptiveTimeoutConfig::default().with_window_size(0), "window_size")]
    #[case(AdaptiveTimeoutConfig::default().with_percentile(0.0), "percentile")]
    #[case(AdaptiveTimeoutConfig::default().with_bounds(Duration::from_secs(2), Duration::from_secs(1)), "min_timeout")]
    #[case(AdaptiveTimeoutConfig::default().with_buffer_ratio(-0.1), "buffer_ratio")]
    #[case(AdaptiveTimeoutConfig::default().with_window_size(5), "min_samples")]
    fn adaptive_timeout_rejects(#[case] config: AdaptiveTimeoutConfig, #[case] field: &str) {
        assert_eq!(config.validate().unwrap_err().field(), field);
    }

    #[test]
    fn zero_concurrency_is_allowed() {
        BackpressureConfig::default().with_max_concurrent(0).validate().unwrap();
    }

    #[test]
    fn nested_errors_surface() {
        let mut config = OrchestratorConfig::new("users");
        config.circuit_breaker = config.circuit_breaker.with_failure_threshold(0);
        assert_eq!(config.validate().unwrap_err().field(), "failure_threshold");
    }

    #[test]
    fn loads_from_json() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{ "name": "users", "failure_policy": "propagate", "l1": { "swr_threshold_ratio": 0.8 } }"#,
        )
        .unwrap();
        assert_eq!(config.name, "users");
        assert_eq!(config.failure_policy, FailurePolicy::Propagate);
        assert!((config.l1.swr_threshold_ratio - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
    }
}
