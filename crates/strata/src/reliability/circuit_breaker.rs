// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use strata_tier::{BackendErrorKind, Clock};

use crate::config::CircuitBreakerConfig;
use crate::{Error, Result};

/// The state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow normally and failures are counted.
    Closed,
    /// Calls fail fast without reaching the remote tier.
    Open,
    /// A limited number of probe calls test whether the remote tier recovered.
    HalfOpen,
}

impl CircuitState {
    /// Returns a stable name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure-isolation state machine guarding the remote tier.
///
/// - `Closed` opens after `failure_threshold` consecutive qualifying failures.
/// - `Open` becomes `HalfOpen` once `recovery_timeout` has passed since the last failure.
/// - `HalfOpen` admits at most `half_open_requests` concurrent probes; it closes after
///   `success_threshold` consecutive successes and reopens on any qualifying failure.
///
/// Error kinds listed in the configuration's excluded set are neither failures nor
/// successes. A permit's result only counts if the circuit has not changed state since
/// the permit was issued; late results from an earlier state are ignored.
///
/// # Examples
///
/// ```
/// use strata::tier::{BackendErrorKind, ClockControl};
/// use strata::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// let control = ClockControl::new();
/// let breaker = CircuitBreaker::new("users", CircuitBreakerConfig::default().with_failure_threshold(2))
///     .with_clock(control.to_clock());
///
/// for _ in 0..2 {
///     breaker.enter().unwrap().failure(Some(BackendErrorKind::Transient));
/// }
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(breaker.enter().is_err());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Clock,
    state: Mutex<Machine>,
}

#[derive(Debug)]
struct Machine {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    probes_in_flight: u32,
    // bumped on every state change; permits only report into the episode they were issued in
    episode: u64,
    opened_count: u64,
    rejected_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Neutral,
}

impl Machine {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            probes_in_flight: 0,
            episode: 0,
            opened_count: 0,
            rejected_count: 0,
        }
    }

    /// Moves `Open` to `HalfOpen` once the recovery timeout has elapsed.
    fn poll(&mut self, now: Instant, config: &CircuitBreakerConfig, name: &str) {
        if self.state != CircuitState::Open {
            return;
        }
        let recovered = self
            .last_failure
            .is_none_or(|at| now.saturating_duration_since(at) >= config.recovery_timeout);
        if recovered {
            self.state = CircuitState::HalfOpen;
            self.episode += 1;
            self.success_count = 0;
            self.probes_in_flight = 0;
            tracing::info!(circuit.name = name, circuit.state = "half_open", "circuit breaker half-open");
        }
    }

    fn open(&mut self, now: Instant, name: &str) {
        self.state = CircuitState::Open;
        self.episode += 1;
        self.last_failure = Some(now);
        self.success_count = 0;
        self.probes_in_flight = 0;
        self.opened_count += 1;
        tracing::warn!(
            circuit.name = name,
            circuit.state = "open",
            circuit.failures = self.failure_count,
            "circuit breaker opened"
        );
    }

    fn record(&mut self, outcome: Outcome, permit: PermitKind, now: Instant, config: &CircuitBreakerConfig, name: &str) {
        // the state this permit was issued in has since changed
        if permit.episode != self.episode {
            return;
        }
        if permit.half_open {
            self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
        }

        match (self.state, outcome) {
            (_, Outcome::Neutral) | (CircuitState::Open, _) => {}
            (CircuitState::Closed, Outcome::Success) => self.failure_count = 0,
            (CircuitState::Closed, Outcome::Failure) => {
                self.failure_count += 1;
                self.last_failure = Some(now);
                if self.failure_count >= config.failure_threshold {
                    self.open(now, name);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                self.success_count += 1;
                if self.success_count >= config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.episode += 1;
                    self.failure_count = 0;
                    self.success_count = 0;
                    tracing::info!(circuit.name = name, circuit.state = "closed", "circuit breaker closed");
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                self.failure_count += 1;
                self.open(now, name);
            }
        }
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named resource, using the system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            clock: Clock::new_system(),
            state: Mutex::new(Machine::new()),
        }
    }

    /// Uses `clock` to measure the recovery timeout.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The protected resource.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks to make one call to the remote tier.
    ///
    /// The returned permit must be resolved with [`CircuitPermit::success`] or
    /// [`CircuitPermit::failure`]. Dropping it unresolved frees its half-open probe slot
    /// without recording anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] while the circuit is open, or while it is half-open
    /// and every probe slot is taken.
    pub fn enter(&self) -> Result<CircuitPermit<'_>> {
        let now = self.clock.instant();
        let mut machine = self.state.lock();
        machine.poll(now, &self.config, &self.name);

        let probe = match machine.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if machine.probes_in_flight < self.config.half_open_requests => {
                machine.probes_in_flight += 1;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                machine.rejected_count += 1;
                return Err(Error::CircuitOpen {
                    resource: self.name.clone(),
                });
            }
        };

        Ok(CircuitPermit {
            breaker: self,
            kind: PermitKind {
                half_open: probe,
                episode: machine.episode,
            },
            resolved: false,
        })
    }

    /// The current state, advancing `Open` to `HalfOpen` if the recovery timeout passed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let now = self.clock.instant();
        let mut machine = self.state.lock();
        machine.poll(now, &self.config, &self.name);
        machine.state
    }

    /// Consecutive qualifying failures counted while closed, or the failures that
    /// led to the current open period.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Consecutive successes counted while half-open.
    #[must_use]
    pub fn success_count(&self) -> u32 {
        self.state.lock().success_count
    }

    /// Times the circuit has opened.
    #[must_use]
    pub fn opened_count(&self) -> u64 {
        self.state.lock().opened_count
    }

    /// Calls rejected without reaching the remote tier.
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.state.lock().rejected_count
    }

    /// Forces the circuit closed and clears the failure and success counts.
    pub fn reset(&self) {
        let mut machine = self.state.lock();
        machine.state = CircuitState::Closed;
        machine.episode += 1;
        machine.failure_count = 0;
        machine.success_count = 0;
        machine.last_failure = None;
        machine.probes_in_flight = 0;
        tracing::info!(circuit.name = self.name.as_str(), circuit.state = "closed", "circuit breaker reset");
    }

    fn resolve(&self, outcome: Outcome, permit: PermitKind) {
        let now = self.clock.instant();
        self.state.lock().record(outcome, permit, now, &self.config, &self.name);
    }
}

#[derive(Debug, Clone, Copy)]
struct PermitKind {
    half_open: bool,
    episode: u64,
}

/// Permission to make one call through a [`CircuitBreaker`].
#[derive(Debug)]
#[must_use = "resolve the permit with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    resolved: bool,
}

impl CircuitPermit<'_> {
    /// Records a successful call.
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.resolve(Outcome::Success, self.kind);
    }

    /// Records a failed call.
    ///
    /// `None` means the failure could not be classified and always counts. A kind in
    /// the excluded set is recorded as neither success nor failure.
    pub fn failure(mut self, kind: Option<BackendErrorKind>) {
        self.resolved = true;
        let outcome = match kind {
            Some(kind) if !self.breaker.config.counts(kind) => Outcome::Neutral,
            _ => Outcome::Failure,
        };
        self.breaker.resolve(outcome, self.kind);
    }

    /// Returns `true` if this call is a half-open probe.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.kind.half_open
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.resolve(Outcome::Neutral, self.kind);
        }
    }
}
