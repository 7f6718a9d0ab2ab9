// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use bytes::Bytes;

/// A value resident in the in-process tier, with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    value: Bytes,
    cached_at: Instant,
    // `None` when `cached_at + ttl` is past the end of representable time
    expires_at: Option<Instant>,
    ttl: Duration,
    size: usize,
    namespace: Option<String>,
}

impl CacheEntry {
    pub(crate) fn new(key: &str, value: Bytes, now: Instant, ttl: Duration, namespace: Option<String>) -> Self {
        Self {
            size: entry_size(key, &value),
            value,
            cached_at: now,
            expires_at: now.checked_add(ttl),
            ttl,
            namespace,
        }
    }

    /// The stored bytes.
    #[must_use]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// When the current value was written.
    #[must_use]
    pub fn cached_at(&self) -> Instant {
        self.cached_at
    }

    /// When the entry stops being served, or `None` if the TTL is too long to reach.
    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// The lifetime the entry was written with.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Bytes charged against the memory budget.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The namespace tag, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns `true` once `now` has reached the expiry.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Time left before expiry, saturating at zero. Entries that never expire report
    /// [`Duration::MAX`].
    #[must_use]
    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.expires_at.map_or(Duration::MAX, |at| at.saturating_duration_since(now))
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.cached_at)
    }

    pub(crate) fn replace(&mut self, key: &str, value: Bytes, now: Instant) {
        self.size = entry_size(key, &value);
        self.value = value;
        self.cached_at = now;
        self.expires_at = now.checked_add(self.ttl);
    }
}

/// The key is charged alongside the value since both are held in memory.
pub(crate) fn entry_size(key: &str, value: &Bytes) -> usize {
    key.len() + value.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_expiry_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new("k", Bytes::from_static(b"v"), now, Duration::MAX, None);

        assert_eq!(entry.expires_at(), None);
        assert!(!entry.is_expired(now + Duration::from_secs(86_400 * 365)));
        assert_eq!(entry.remaining_ttl(now), Duration::MAX);
        assert_eq!(entry.ttl(), Duration::MAX);
    }
}
