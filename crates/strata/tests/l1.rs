// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Behavior of the in-process tier through its public API.

use std::time::Duration;

use bytes::Bytes;
use strata::tier::ClockControl;
use strata::{Jitter, L1Cache, L1Config};

const TTL: Duration = Duration::from_secs(100);

fn cache(config: L1Config) -> (L1Cache, ClockControl) {
    let control = ClockControl::new();
    let cache = L1Cache::new(config)
        .with_clock(control.to_clock())
        .with_jitter(Jitter::none());
    (cache, control)
}

fn value(text: &'static str) -> Bytes {
    Bytes::from_static(text.as_bytes())
}

#[test]
fn fresh_entry_does_not_need_refresh() {
    let (cache, _) = cache(L1Config::default());
    cache.put("k", value("v"), TTL, None);

    let hit = cache.get_with_swr("k", TTL).unwrap();
    assert_eq!(hit.value, value("v"));
    assert!(!hit.needs_refresh);
}

#[test]
fn first_observer_of_staleness_refreshes() {
    let (cache, control) = cache(L1Config::default().with_swr_threshold_ratio(0.5));
    cache.put("k", value("v"), TTL, None);
    control.advance(Duration::from_secs(60));

    let first = cache.get_with_swr("k", TTL).unwrap();
    assert_eq!(first.value, value("v"));
    assert!(first.needs_refresh);

    let second = cache.get_with_swr("k", TTL).unwrap();
    assert!(!second.needs_refresh);
    assert!(cache.is_refreshing("k"));
}

#[test]
fn namespace_invalidation_leaves_other_keys() {
    for indexed in [true, false] {
        let (cache, _) = cache(L1Config::default().with_namespace_index(indexed));
        cache.put("u1", value("a"), TTL, Some("users"));
        cache.put("u2", value("b"), TTL, Some("users"));
        cache.put("other", value("c"), TTL, None);

        assert_eq!(cache.invalidate_by_namespace("users"), 2, "indexed: {indexed}");
        assert!(cache.get("u1").is_none());
        assert!(cache.get("u2").is_none());
        assert_eq!(cache.get("other"), Some(value("c")));
    }
}

#[test]
fn invalidation_beats_in_flight_refresh() {
    let (cache, control) = cache(L1Config::default());
    cache.put("k", value("old"), TTL, None);
    control.advance(Duration::from_secs(60));

    let hit = cache.get_with_swr("k", TTL).unwrap();
    assert!(hit.needs_refresh);

    assert!(cache.invalidate_by_key("k"));
    assert!(!cache.is_refreshing("k"));
    assert!(!cache.complete_refresh("k", hit.version, value("new"), control.to_clock().instant()));
    assert!(cache.get("k").is_none());

    // a later write does not revive the stale version either
    cache.put("k", value("fresh"), TTL, None);
    assert!(!cache.complete_refresh("k", hit.version, value("new"), control.to_clock().instant()));
    assert_eq!(cache.get("k"), Some(value("fresh")));
}

#[test]
fn eviction_removes_least_recently_used() {
    // each entry costs 2 bytes of key plus 8 of value
    let (cache, _) = cache(L1Config::default().with_max_memory_bytes(40).with_max_entry_bytes(40));
    for key in ["k0", "k1", "k2", "k3"] {
        cache.put(key, value("12345678"), TTL, None);
    }
    assert_eq!(cache.memory_usage(), 40);

    // touch the two oldest so k2 and k3 become the eviction candidates
    assert!(cache.get("k0").is_some());
    assert!(cache.get("k1").is_some());

    cache.put("k4", value("12345678"), TTL, None);
    cache.put("k5", value("12345678"), TTL, None);

    assert!(cache.memory_usage() <= 40);
    assert!(cache.peek("k2").is_none());
    assert!(cache.peek("k3").is_none());
    for key in ["k0", "k1", "k4", "k5"] {
        assert!(cache.peek(key).is_some(), "{key} should be resident");
    }
    assert_eq!(cache.stats().evictions, 2);
}

#[test]
fn budget_holds_under_random_workload() {
    let (cache, _) = cache(L1Config::default().with_max_memory_bytes(1024).with_max_entry_bytes(256));
    let mut rng = fastrand::Rng::with_seed(7);

    for _ in 0..2000 {
        let key = format!("key-{}", rng.u32(0..200));
        let len = rng.usize(0..300);
        cache.put(&key, Bytes::from(vec![0_u8; len]), TTL, None);
        if rng.bool() {
            let _ = cache.get(&format!("key-{}", rng.u32(0..200)));
        }
        assert!(cache.memory_usage() <= 1024);
    }
}

#[test]
fn expired_entries_miss() {
    let (cache, control) = cache(L1Config::default());
    cache.put("k", value("v"), Duration::from_secs(10), None);
    control.advance(Duration::from_secs(10));
    assert!(cache.get("k").is_none());
    assert!(cache.get_with_swr("k", Duration::from_secs(10)).is_none());
    assert_eq!(cache.stats().expirations, 1);
}

#[test]
fn concurrent_access_stays_within_budget() {
    let cache = std::sync::Arc::new(L1Cache::new(L1Config::default().with_max_memory_bytes(4096)));
    let threads: Vec<_> = (0..8)
        .map(|t| {
            let cache = std::sync::Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("t{t}-{}", i % 50);
                    cache.put(&key, Bytes::from(vec![1_u8; 64]), TTL, Some("load"));
                    let _ = cache.get_with_swr(&key, TTL);
                    if i % 97 == 0 {
                        cache.invalidate_by_namespace("load");
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    assert!(cache.memory_usage() <= 4096);
}

#[test]
fn unbounded_ttl_is_served_indefinitely() {
    let (cache, control) = cache(L1Config::default());
    assert!(cache.put("k", value("v"), Duration::MAX, None));

    control.advance(Duration::from_secs(10 * 365 * 86_400));
    assert_eq!(cache.get("k"), Some(value("v")));
    let hit = cache.get_with_swr("k", Duration::MAX).unwrap();
    assert!(!hit.needs_refresh);
}
