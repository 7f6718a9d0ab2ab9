// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the in-process backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use strata_tier::{Backend, ClockControl, MemoryBackend};

#[tokio::test]
async fn clones_share_storage() {
    let a = MemoryBackend::new();
    let b = a.clone();

    a.set("shared", Bytes::from_static(b"1"), None).await.unwrap();
    assert_eq!(b.get("shared").await.unwrap(), Some(Bytes::from_static(b"1")));
    assert_eq!(b.get_ttl("shared").await.unwrap(), None, "no expiry was requested");

    assert!(b.delete("shared").await.unwrap());
    assert!(!a.exists("shared").await.unwrap());
    assert!(a.is_empty());
}

#[tokio::test]
async fn refresh_ttl_extends_lifetime() {
    let control = ClockControl::new();
    let backend = MemoryBackend::with_clock(control.to_clock());

    backend
        .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(10)))
        .await
        .unwrap();
    control.advance_secs(9);
    assert!(backend.refresh_ttl("k", Duration::from_secs(10)).await.unwrap());

    control.advance_secs(9);
    assert!(backend.exists("k").await.unwrap());
    assert!(!backend.refresh_ttl("missing", Duration::from_secs(1)).await.unwrap());
}

#[tokio::test]
async fn waiter_acquires_after_release() {
    let backend = MemoryBackend::new();
    let held = backend
        .acquire_lock("k", Duration::ZERO, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(held.is_acquired());

    let waiter = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.acquire_lock("k", Duration::from_secs(5), Duration::from_secs(30)).await })
    };

    tokio::task::yield_now().await;
    assert!(backend.release_lock(held).await.unwrap());

    let lease = waiter.await.unwrap().unwrap();
    assert!(lease.is_acquired());
    assert!(backend.release_lock(lease).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn waiter_gives_up_after_timeout() {
    let backend = MemoryBackend::new();
    let _held = backend
        .acquire_lock("k", Duration::ZERO, Duration::from_secs(30))
        .await
        .unwrap();

    let start = tokio::time::Instant::now();
    let lease = backend
        .acquire_lock("k", Duration::from_millis(50), Duration::from_secs(30))
        .await
        .unwrap();

    assert!(!lease.is_acquired());
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_admits_one_holder_at_a_time() {
    let backend = MemoryBackend::new().with_lock_poll_interval(Duration::from_millis(1));
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let backend = backend.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tokio::spawn(async move {
                let lease = backend
                    .acquire_lock("k", Duration::from_secs(10), Duration::from_secs(30))
                    .await
                    .unwrap();
                assert!(lease.is_acquired());

                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);

                assert!(backend.release_lock(lease).await.unwrap());
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn health_reports_counts() {
    let backend = MemoryBackend::new();
    backend.set("a", Bytes::from_static(b"1"), None).await.unwrap();

    let health = backend.health_check().await;
    assert!(health.is_healthy());
    assert_eq!(health.details().get("entries").map(String::as_str), Some("1"));
    assert_eq!(health.details().get("locks").map(String::as_str), Some("0"));
}

#[tokio::test]
async fn unbounded_durations_never_expire() {
    let control = ClockControl::new();
    let backend = MemoryBackend::with_clock(control.to_clock());

    backend.set("k", Bytes::from_static(b"v"), Some(Duration::MAX)).await.unwrap();
    assert!(backend.refresh_ttl("k", Duration::MAX).await.unwrap());
    let lease = backend.acquire_lock("k", Duration::MAX, Duration::MAX).await.unwrap();
    assert!(lease.is_acquired());

    control.advance_secs(10 * 365 * 86_400);
    assert!(backend.exists("k").await.unwrap());
    assert_eq!(backend.get_ttl("k").await.unwrap(), None);
    assert!(backend.is_locked("k"));
}
