// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters for one cache.
///
/// Counts accumulate for the lifetime of the cache. `hits` is the sum of `l1_hits` and
/// `l2_hits`. Callers that joined another caller's in-flight load are not counted, and
/// background refreshes count only in the `refreshes_*` fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from either tier.
    pub hits: u64,
    /// Requests answered from the in-process tier.
    pub l1_hits: u64,
    /// Requests answered from the remote tier.
    pub l2_hits: u64,
    /// Requests that ran the producer.
    pub misses: u64,
    /// Failed remote-tier calls.
    pub errors: u64,
    /// Producer calls made because the remote tier was unavailable.
    pub fallbacks: u64,
    /// Times the circuit breaker opened.
    pub circuit_opens: u64,
    /// Background refreshes started.
    pub refreshes_started: u64,
    /// Background refreshes whose value was committed.
    pub refreshes_committed: u64,
    /// Background refreshes that failed or lost to an invalidation.
    pub refreshes_aborted: u64,
}

impl CacheStats {
    /// Fraction of requests that were hits, or `0.0` before any request.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }

    /// Remote-tier failures per request, or `0.0` before any request.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.hits + self.misses)
    }
}

#[expect(clippy::cast_precision_loss, reason = "rates tolerate precision loss on huge counts")]
fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 { 0.0 } else { part as f64 / total as f64 }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    fallbacks: AtomicU64,
    refreshes_started: AtomicU64,
    refreshes_committed: AtomicU64,
    refreshes_aborted: AtomicU64,
}

impl StatsRecorder {
    pub fn l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_started(&self) {
        self.refreshes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_committed(&self) {
        self.refreshes_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_aborted(&self) {
        self.refreshes_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, circuit_opens: u64) -> CacheStats {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        CacheStats {
            hits: l1_hits + l2_hits,
            l1_hits,
            l2_hits,
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            circuit_opens,
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_committed: self.refreshes_committed.load(Ordering::Relaxed),
            refreshes_aborted: self.refreshes_aborted.load(Ordering::Relaxed),
        }
    }
}
