// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Circuit breaker and admission control under realistic call patterns.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use strata::tier::{BackendErrorKind, ClockControl};
use strata::{
    AdaptiveTimeout, AdaptiveTimeoutConfig, BackpressureConfig, BackpressureController, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, Error, OverloadReason,
};

#[test]
fn breaker_full_cycle() {
    let control = ClockControl::new();
    let config = CircuitBreakerConfig::default()
        .with_failure_threshold(3)
        .with_success_threshold(2)
        .with_recovery_timeout(Duration::from_secs(10));
    let breaker = CircuitBreaker::new("store", config).with_clock(control.to_clock());

    for _ in 0..3 {
        breaker.enter().unwrap().failure(Some(BackendErrorKind::Transient));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.opened_count(), 1);

    // fail fast without reaching the remote tier
    let remote_calls = AtomicUsize::new(0);
    let attempt = breaker.enter().map(|permit| {
        remote_calls.fetch_add(1, Ordering::SeqCst);
        permit.success();
    });
    assert!(matches!(attempt, Err(Error::CircuitOpen { resource }) if resource == "store"));
    assert_eq!(remote_calls.load(Ordering::SeqCst), 0);
    assert_eq!(breaker.rejected_count(), 1);

    control.advance(Duration::from_secs(10));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.enter().unwrap().success();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    breaker.enter().unwrap().success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[test]
fn custom_exclusions_replace_defaults() {
    let config = CircuitBreakerConfig::default()
        .with_failure_threshold(1)
        .with_excluded_kinds([BackendErrorKind::Timeout]);
    let breaker = CircuitBreaker::new("store", config);

    breaker.enter().unwrap().failure(Some(BackendErrorKind::Timeout));
    assert_eq!(breaker.state(), CircuitState::Closed);

    breaker.enter().unwrap().failure(Some(BackendErrorKind::Permanent));
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admission_never_exceeds_limit() {
    const LIMIT: usize = 4;

    let gate = Arc::new(BackpressureController::new(
        "store",
        BackpressureConfig::default()
            .with_max_concurrent(LIMIT)
            .with_queue_size(64)
            .with_timeout(Duration::from_secs(5)),
    ));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= LIMIT);
    assert_eq!(gate.rejected_count(), 0);
    assert_eq!(gate.available_permits(), LIMIT);
}

#[tokio::test(start_paused = true)]
async fn admission_rejects_beyond_limit_plus_queue() {
    let gate = Arc::new(BackpressureController::new(
        "store",
        BackpressureConfig::default()
            .with_max_concurrent(2)
            .with_queue_size(3)
            .with_timeout(Duration::from_secs(1)),
    ));

    let held = vec![gate.acquire().await.unwrap(), gate.acquire().await.unwrap()];

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await.map(drop) })
        })
        .collect();
    while gate.queue_depth() < 3 {
        tokio::task::yield_now().await;
    }

    for _ in 0..5 {
        let err = gate.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Overloaded {
                reason: OverloadReason::QueueFull,
                ..
            }
        ));
    }
    assert_eq!(gate.rejected_count(), 5);

    drop(held);
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    assert_eq!(gate.queue_depth(), 0);
}

#[test]
fn overload_is_not_a_breaker_failure() {
    let err = Error::Overloaded {
        resource: "store".to_owned(),
        reason: OverloadReason::QueueFull,
    };
    assert_eq!(err.backend_kind(), None);
    assert!(err.is_remote());
}

#[test]
fn adaptive_timeout_tracks_latency() {
    let timeout = AdaptiveTimeout::new(
        AdaptiveTimeoutConfig::default()
            .with_window_size(20)
            .with_bounds(Duration::from_millis(10), Duration::from_secs(10)),
    );
    assert_eq!(timeout.timeout(), Duration::from_millis(20));

    for _ in 0..20 {
        timeout.record_duration(Duration::from_millis(100));
    }
    assert_eq!(timeout.timeout(), Duration::from_millis(150));

    // the window slides; old fast samples fall out
    for _ in 0..20 {
        timeout.record_duration(Duration::from_secs(1));
    }
    assert_eq!(timeout.timeout(), Duration::from_millis(1500));
}
