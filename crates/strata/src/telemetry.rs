// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured log events for cache activity.

use std::time::Duration;

use tracing::Level;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOperation {
    Get,
    Insert,
    Invalidate,
    Refresh,
    Lock,
    Unlock,
    Compute,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::Insert => "cache.insert",
            Self::Invalidate => "cache.invalidate",
            Self::Refresh => "cache.refresh",
            Self::Lock => "cache.lock",
            Self::Unlock => "cache.unlock",
            Self::Compute => "cache.compute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    Hit,
    L2Hit,
    Miss,
    Stale,
    Inserted,
    Invalidated,
    Ok,
    LockContended,
    RefreshCommitted,
    RefreshAborted,
    Fallback,
    Error,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::L2Hit => "cache.l2_hit",
            Self::Miss => "cache.miss",
            Self::Stale => "cache.stale",
            Self::Inserted => "cache.inserted",
            Self::Invalidated => "cache.invalidated",
            Self::Ok => "cache.ok",
            Self::LockContended => "cache.lock_contended",
            Self::RefreshCommitted => "cache.refresh_committed",
            Self::RefreshAborted => "cache.refresh_aborted",
            Self::Fallback => "cache.fallback",
            Self::Error => "cache.error",
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::Hit | Self::L2Hit | Self::Miss | Self::Ok => Level::DEBUG,
            Self::Stale | Self::Inserted | Self::Invalidated | Self::RefreshCommitted => Level::INFO,
            Self::LockContended | Self::RefreshAborted | Self::Fallback => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

/// Emits one cache event.
pub(crate) fn record(
    cache_name: &str,
    correlation_id: Uuid,
    operation: CacheOperation,
    activity: CacheActivity,
    duration: Option<Duration>,
) {
    let op = operation.as_str();
    let ev = activity.as_str();
    let duration_ns = duration.map(|d| d.as_nanos());

    // Tracing level must be constant, so we use a macro to select the appropriate level.
    macro_rules! emit_event {
        ($level:ident) => {
            tracing::$level!(
                cache.name = cache_name,
                cache.operation = op,
                cache.activity = ev,
                cache.duration_ns = ?duration_ns,
                correlation_id = %correlation_id,
                "cache.event"
            )
        };
    }

    match activity.level() {
        Level::ERROR => emit_event!(error),
        Level::WARN => emit_event!(warn),
        Level::INFO => emit_event!(info),
        _ => emit_event!(debug),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LogCapture;

    #[test]
    fn operation_names() {
        assert_eq!(CacheOperation::Get.as_str(), "cache.get");
        assert_eq!(CacheOperation::Insert.as_str(), "cache.insert");
        assert_eq!(CacheOperation::Invalidate.as_str(), "cache.invalidate");
        assert_eq!(CacheOperation::Refresh.as_str(), "cache.refresh");
        assert_eq!(CacheOperation::Lock.as_str(), "cache.lock");
        assert_eq!(CacheOperation::Unlock.as_str(), "cache.unlock");
        assert_eq!(CacheOperation::Compute.as_str(), "cache.compute");
    }

    #[test]
    fn activity_levels() {
        assert_eq!(CacheActivity::Hit.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Stale.level(), Level::INFO);
        assert_eq!(CacheActivity::Fallback.level(), Level::WARN);
        assert_eq!(CacheActivity::Error.level(), Level::ERROR);
    }

    #[test]
    fn record_emits_fields() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let id = Uuid::new_v4();

        record(
            "users",
            id,
            CacheOperation::Get,
            CacheActivity::Error,
            Some(Duration::from_nanos(1500)),
        );

        capture.assert_contains("cache.event");
        capture.assert_contains("cache.name=\"users\"");
        capture.assert_contains("cache.operation=\"cache.get\"");
        capture.assert_contains("cache.activity=\"cache.error\"");
        capture.assert_contains("cache.duration_ns=Some(1500)");
        capture.assert_contains(&id.to_string());
    }
}
