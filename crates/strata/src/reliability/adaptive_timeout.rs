// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::AdaptiveTimeoutConfig;

/// Derives a remote-call budget from recently observed latencies.
///
/// Keeps the last `window_size` durations. Until `min_samples` have been seen the budget
/// is twice the lower bound. After that it is the configured percentile of the window
/// plus `buffer_ratio` headroom. The budget is always clamped to the configured bounds.
#[derive(Debug)]
pub struct AdaptiveTimeout {
    config: AdaptiveTimeoutConfig,
    window: Mutex<VecDeque<Duration>>,
}

impl AdaptiveTimeout {
    /// Creates an estimator with an empty window.
    #[must_use]
    pub fn new(config: AdaptiveTimeoutConfig) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(config.window_size.min(4096))),
            config,
        }
    }

    /// Adds one observed duration, dropping the oldest once the window is full.
    pub fn record_duration(&self, duration: Duration) {
        let mut window = self.window.lock();
        while window.len() >= self.config.window_size.max(1) {
            window.pop_front();
        }
        window.push_back(duration);
    }

    /// The current budget.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        let (min, max) = (self.config.min_timeout, self.config.max_timeout);

        let mut samples: Vec<Duration> = {
            let window = self.window.lock();
            if window.len() < self.config.min_samples {
                return min.saturating_mul(2).min(max);
            }
            window.iter().copied().collect()
        };
        if samples.is_empty() {
            return min.saturating_mul(2).min(max);
        }

        samples.sort_unstable();
        let observed = samples[rank(self.config.percentile, samples.len())];
        observed
            .mul_f64(1.0 + self.config.buffer_ratio.max(0.0))
            .clamp(min, max)
    }

    /// Number of durations currently in the window.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.window.lock().len()
    }

    /// Forgets every recorded duration.
    pub fn reset(&self) {
        self.window.lock().clear();
    }

    /// The settings this estimator was created with.
    #[must_use]
    pub fn config(&self) -> &AdaptiveTimeoutConfig {
        &self.config
    }
}

/// Nearest-rank index of `percentile` in a sorted slice of `len` items.
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "the rank is clamped to the slice bounds"
)]
fn rank(percentile: f64, len: usize) -> usize {
    let position = (percentile / 100.0 * len as f64).ceil() as usize;
    position.clamp(1, len) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(min: u64, max: u64) -> AdaptiveTimeout {
        AdaptiveTimeout::new(
            AdaptiveTimeoutConfig::default()
                .with_window_size(100)
                .with_bounds(Duration::from_millis(min), Duration::from_millis(max)),
        )
    }

    #[test]
    fn warm_up_uses_twice_the_minimum() {
        let timeout = estimator(500, 30_000);
        assert_eq!(timeout.timeout(), Duration::from_secs(1));

        for _ in 0..9 {
            timeout.record_duration(Duration::from_millis(100));
        }
        assert_eq!(timeout.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn warm_up_respects_the_maximum() {
        let timeout = estimator(800, 1000);
        assert_eq!(timeout.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn percentile_with_headroom() {
        let timeout = estimator(50, 5000);
        for _ in 0..18 {
            timeout.record_duration(Duration::from_millis(10));
        }
        for _ in 0..2 {
            timeout.record_duration(Duration::from_millis(500));
        }
        assert_eq!(timeout.timeout(), Duration::from_millis(750));
    }

    #[test]
    fn clamps_to_bounds() {
        let timeout = AdaptiveTimeout::new(
            AdaptiveTimeoutConfig::default()
                .with_window_size(50)
                .with_bounds(Duration::from_secs(1), Duration::from_secs(3)),
        );
        for _ in 0..20 {
            timeout.record_duration(Duration::from_millis(1));
        }
        assert_eq!(timeout.timeout(), Duration::from_secs(1));

        for _ in 0..50 {
            timeout.record_duration(Duration::from_secs(10));
        }
        assert_eq!(timeout.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn window_drops_oldest() {
        let timeout = AdaptiveTimeout::new(AdaptiveTimeoutConfig::default().with_window_size(3).with_min_samples(1));
        for millis in [100, 200, 300, 400] {
            timeout.record_duration(Duration::from_millis(millis));
        }
        assert_eq!(timeout.sample_count(), 3);

        timeout.reset();
        assert_eq!(timeout.sample_count(), 0);
    }

    #[test]
    fn rank_is_nearest() {
        assert_eq!(rank(95.0, 20), 18);
        assert_eq!(rank(100.0, 20), 19);
        assert_eq!(rank(50.0, 4), 1);
        assert_eq!(rank(0.01, 4), 0);
    }
}
