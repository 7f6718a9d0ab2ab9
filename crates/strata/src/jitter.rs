// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

/// Source of the random spread applied to refresh thresholds.
///
/// Spreading thresholds keeps many keys written with the same TTL from all turning stale
/// in the same instant. The default draws from a fast non-cryptographic generator;
/// tests can pin the draw with [`Jitter::fixed`] or script it with [`Jitter::from_fn`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata::Jitter;
///
/// // 0.5 is the midpoint and leaves durations unchanged.
/// let jitter = Jitter::fixed(0.5);
/// assert_eq!(jitter.spread(Duration::from_secs(50), 0.1), Duration::from_secs(50));
///
/// // 1.0 is the top of the range.
/// let jitter = Jitter::fixed(1.0);
/// let spread = jitter.spread(Duration::from_secs(50), 0.1);
/// assert!((spread.as_secs_f64() - 55.0).abs() < 1e-6);
/// ```
#[derive(Clone, Default)]
pub struct Jitter(Source);

#[derive(Clone, Default)]
enum Source {
    #[default]
    Random,
    Fixed(f64),
    Function(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Jitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Source::Random => write!(f, "Random"),
            Source::Fixed(value) => write!(f, "Fixed({value})"),
            Source::Function(_) => write!(f, "Function"),
        }
    }
}

impl Jitter {
    /// Draws uniformly from `[0, 1)`.
    #[must_use]
    pub fn random() -> Self {
        Self(Source::Random)
    }

    /// Always draws `value`.
    #[must_use]
    pub fn fixed(value: f64) -> Self {
        Self(Source::Fixed(value))
    }

    /// Leaves every duration unchanged.
    #[must_use]
    pub fn none() -> Self {
        Self::fixed(0.5)
    }

    /// Draws by calling `f`.
    #[must_use]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self(Source::Function(Arc::new(f)))
    }

    /// Returns the next draw, clamped to `[0, 1]`.
    #[must_use]
    pub fn next_f64(&self) -> f64 {
        let value = match &self.0 {
            Source::Random => fastrand::f64(),
            Source::Fixed(value) => *value,
            Source::Function(generator) => generator(),
        };
        if value.is_nan() { 0.5 } else { value.clamp(0.0, 1.0) }
    }

    /// Scales `duration` by a factor drawn uniformly from `[1 - spread, 1 + spread]`.
    #[must_use]
    pub fn spread(&self, duration: Duration, spread: f64) -> Duration {
        let factor = (self.next_f64().mul_add(2.0, -1.0)).mul_add(spread, 1.0);
        Duration::try_from_secs_f64(duration.as_secs_f64() * factor.max(0.0)).unwrap_or(duration)
    }
}
