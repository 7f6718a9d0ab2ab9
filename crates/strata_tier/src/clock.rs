// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time source shared by every component that reasons about expiry.
//!
//! All time-dependent logic reads the current time through a [`Clock`] instead of calling
//! [`Instant::now`] directly. Production code uses [`Clock::new_system`]; tests obtain a clock
//! from a [`ClockControl`] and move time forward explicitly, which makes expiry, refresh
//! thresholds and recovery timeouts deterministic.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

/// Provides the current time.
///
/// Cloning a clock is cheap; all clones created from the same [`ClockControl`]
/// observe the same time.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata_tier::clock::ClockControl;
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let before = clock.instant();
/// control.advance(Duration::from_secs(60));
/// assert_eq!(clock.instant() - before, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Clock(Source);

#[derive(Debug, Clone, Default)]
enum Source {
    #[default]
    System,
    Controlled(Arc<Mutex<State>>),
}

impl Clock {
    /// Creates a clock backed by the operating system's monotonic and wall clocks.
    #[must_use]
    pub fn new_system() -> Self {
        Self(Source::System)
    }

    /// Creates a clock that never advances on its own.
    ///
    /// Equivalent to `ClockControl::new().to_clock()` with the control dropped.
    #[must_use]
    pub fn new_frozen() -> Self {
        ClockControl::new().to_clock()
    }

    /// Returns the current monotonic instant.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &self.0 {
            Source::System => Instant::now(),
            Source::Controlled(state) => state.lock().instant(),
        }
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        match &self.0 {
            Source::System => SystemTime::now(),
            Source::Controlled(state) => state.lock().system_time(),
        }
    }

    /// Returns the time elapsed since `earlier`, saturating at zero.
    #[must_use]
    pub fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.instant().saturating_duration_since(earlier)
    }

    /// Returns `true` if this clock is driven by a [`ClockControl`].
    #[must_use]
    pub fn is_controlled(&self) -> bool {
        matches!(self.0, Source::Controlled(_))
    }
}

/// Moves a controlled [`Clock`] forward.
///
/// Time only changes when [`advance`](Self::advance) is called, so tests can position
/// themselves exactly before or after a threshold.
#[derive(Debug, Clone, Default)]
pub struct ClockControl {
    state: Arc<Mutex<State>>,
}

impl ClockControl {
    /// Creates a control whose clock starts at the current system time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clock that follows this control.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock(Source::Controlled(Arc::clone(&self.state)))
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.state.lock().offset += duration;
    }

    /// Advances the clock by the given number of seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }
}

impl From<&ClockControl> for Clock {
    fn from(control: &ClockControl) -> Self {
        control.to_clock()
    }
}

#[derive(Debug)]
struct State {
    origin: Instant,
    origin_system: SystemTime,
    offset: Duration,
}

impl Default for State {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            origin_system: SystemTime::now(),
            offset: Duration::ZERO,
        }
    }
}

impl State {
    fn instant(&self) -> Instant {
        self.origin + self.offset
    }

    fn system_time(&self) -> SystemTime {
        self.origin_system + self.offset
    }
}
